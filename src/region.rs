/// Region codes and their aliases, in classification order. A line naming
/// several regions is attributed to the earliest entry here.
const REGION_TABLE: &[(&str, &[&str])] = &[
    ("HK", &["hk", "hong kong", "香港"]),
    ("JP", &["jp", "japan", "日本"]),
    ("SG", &["sg", "singapore", "新加坡"]),
    ("KR", &["kr", "korea", "韩国", "韓國"]),
    ("TW", &["tw", "taiwan", "台湾", "台灣"]),
    ("US", &["us", "united states", "美国"]),
];

fn aliases(region: &str) -> Option<&'static [&'static str]> {
    REGION_TABLE
        .iter()
        .find(|(code, _)| code.eq_ignore_ascii_case(region))
        .map(|(_, aliases)| *aliases)
}

/// Whether `line` mentions `region` by code, English or localized name.
/// Codes missing from the table match on themselves only.
pub fn matches_region(line: &str, region: &str) -> bool {
    let folded = line.to_lowercase();
    match aliases(region) {
        Some(list) => list.iter().any(|a| folded.contains(a)),
        None => !region.is_empty() && folded.contains(&region.to_lowercase()),
    }
}

/// First region among `targets` matching `line`, in table order; codes not
/// in the table are checked afterwards in the order given.
pub fn classify<'a>(line: &str, targets: &'a [String]) -> Option<&'a str> {
    let known = REGION_TABLE
        .iter()
        .filter_map(|(code, _)| targets.iter().find(|t| t.eq_ignore_ascii_case(code)));
    let unknown = targets.iter().filter(|t| aliases(t).is_none());
    known
        .chain(unknown)
        .find(|t| matches_region(line, t))
        .map(String::as_str)
}
