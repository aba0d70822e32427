/// ISP placeholder when the provider gave none.
pub const ISP_UNKNOWN: &str = "未知ISP";
/// Region placeholder when the provider answered but could not place the address.
pub const REGION_UNKNOWN: &str = "未知";
/// Region and ISP placeholder when the provider could not be queried.
pub const LOOKUP_FAILED: &str = "查询失败";

/// Region and ISP attached to an endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enrichment {
    pub region: String,
    pub isp: String,
}

impl Enrichment {
    pub fn new(region: impl Into<String>, isp: impl Into<String>) -> Self {
        Enrichment {
            region: region.into(),
            isp: isp.into(),
        }
    }

    pub fn unknown() -> Self {
        Enrichment::new(REGION_UNKNOWN, ISP_UNKNOWN)
    }

    pub fn lookup_failed() -> Self {
        Enrichment::new(LOOKUP_FAILED, LOOKUP_FAILED)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointInfo {
    pub endpoint: String,
    pub region: String,
    pub isp: String,
}

impl EndpointInfo {
    pub fn new(endpoint: &str, enrichment: Enrichment) -> Self {
        EndpointInfo {
            endpoint: endpoint.to_string(),
            region: enrichment.region,
            isp: enrichment.isp,
        }
    }
}

/// Region hint from a region-targeted source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    pub region: String,
    pub provenance: String,
}

/// One endpoint as discovered by an ingestor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ingested {
    pub endpoint: String,
    pub tag: Option<Tag>,
}

impl Ingested {
    pub fn untagged(endpoint: impl Into<String>) -> Self {
        Ingested {
            endpoint: endpoint.into(),
            tag: None,
        }
    }

    pub fn tagged(endpoint: impl Into<String>, region: &str, provenance: &str) -> Self {
        Ingested {
            endpoint: endpoint.into(),
            tag: Some(Tag {
                region: region.to_string(),
                provenance: provenance.to_string(),
            }),
        }
    }
}
