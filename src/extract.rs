use std::sync::LazyLock;

use anyhow::Result;
use regex::Regex;

/// Tokens that disqualify an accessory line. The accessory pattern sits right
/// above the store's recap/disclaimer block on some listings, so a line that
/// mentions pricing keywords or a brand name is a recap line, not a real
/// accessory list.
pub const ACCESSORY_EXCLUDE: &[&str] = &[
    "매장가",
    "시중가",
    "TC",
    "상태등급",
    "보테가베네타",
    "샤넬",
    "루이비통",
    "구찌",
    "디올",
    "에르메스",
    "페라가모",
    "프라다",
    "생로랑",
    "지방시",
    "발렌시아가",
];

/// Accessory label; wording varies by storefront.
static ACCESSORY_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:구성품\s*/|부속품\s*:)\s*").expect("hardcoded accessory marker is valid")
});

/// Compiled description-field patterns. These are heuristics carried over
/// from the storefronts' free-text conventions; the color pattern in
/// particular can match unrelated text directly before 색상/컬러/스킨.
pub struct Patterns {
    pub condition: Regex,
    pub engraving: Regex,
    pub color: Regex,
    pub material: Regex,
    pub size: Regex,
    pub purchase_ym: Regex,
    pub purchase_price: Regex,
}

impl Patterns {
    pub fn new() -> Result<Self> {
        Ok(Self {
            condition: compile(r"상태\s*/\s*([^\n]+)")?,
            engraving: compile(r"([A-Z]{1,2})\s*각인")?,
            color: compile(r"([^\n]+)\s*(?:색상|컬러|스킨)")?,
            material: compile(r"([^\n]+)\s*소재")?,
            size: compile(r"사이즈\s*/\s*([^\n]+)")?,
            purchase_ym: compile(r"(\d{4}년 \d{1,2})월")?,
            purchase_price: compile(r"(?:[^\n:]*?\s*)(?:매장가|시중가) \s*([^\n]+)\s*(?:입니다|입니다.)")?,
        })
    }
}

/// Patterns may match across line boundaries, so `.` includes newlines.
fn compile(pattern: &str) -> Result<Regex> {
    Ok(Regex::new(&format!("(?s){pattern}"))?)
}

/// First capture group of the first match, trimmed. Absent or empty input is
/// a normal miss, never an error.
pub fn extract_first(text: Option<&str>, re: &Regex) -> Option<String> {
    let text = text?;
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Accessory extraction with the exclusion guard: take only the first line
/// after the marker and reject it outright if it contains any excluded token.
pub fn extract_accessory_filtered(text: Option<&str>) -> Option<String> {
    let text = text?;
    let m = ACCESSORY_MARKER.find(text)?;
    let first_line = text[m.end()..].lines().next()?.trim();
    if first_line.is_empty() {
        return None;
    }
    if ACCESSORY_EXCLUDE.iter().any(|kw| first_line.contains(kw)) {
        return None;
    }
    Some(first_line.to_string())
}

// ── Tests ──
