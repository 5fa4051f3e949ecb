//! One line of decoder output, parsed into a typed group.
//!
//! The decoder emits one JSON object per RDS group. The group type is kept
//! as a closed enum so the rules engine can match exhaustively; types we do
//! not interpret fall through to `Other` with the raw map still available
//! on the `DecodedGroup`.

use serde::Deserialize;
use serde_json::Value;

/// RDS group type, keyed on the decoder's `group` field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupType {
    /// 0A/0B: PS segments, TA/TP flags, PTY.
    Basic,
    /// 1A/1B: programme item number, slow labelling.
    ProgrammeItem,
    /// 2A/2B: RadioText.
    RadioText,
    /// 3A: open data application identification.
    Oda,
    /// 4A: clock time.
    Clock,
    /// 14A: enhanced other networks.
    Eon,
    /// 15A: long PS (RDS2).
    LongPs,
    /// Anything else, carried by name.
    Other(String),
}

impl GroupType {
    fn from_label(label: &str) -> Self {
        match label {
            "0A" | "0B" => GroupType::Basic,
            "1A" | "1B" => GroupType::ProgrammeItem,
            "2A" | "2B" => GroupType::RadioText,
            "3A" => GroupType::Oda,
            "4A" => GroupType::Clock,
            "14A" => GroupType::Eon,
            "15A" => GroupType::LongPs,
            other => GroupType::Other(other.to_string()),
        }
    }
}

/// EON cross-reference to a station on another frequency.
#[derive(Debug, Clone, Deserialize)]
pub struct OtherNetwork {
    pub pi: Option<String>,
    pub ps: Option<String>,
    pub tp: Option<bool>,
    pub ta: Option<bool>,
    pub kilohertz: Option<i64>,
}

/// RadioText Plus tag (artist / title markers inside RT).
#[derive(Debug, Clone, Deserialize)]
pub struct RtPlusTag {
    #[serde(rename = "content-type")]
    pub content_type: Option<String>,
    pub data: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RtPlus {
    pub item_running: Option<bool>,
    #[serde(default)]
    pub tags: Vec<RtPlusTag>,
}

/// A decoded RDS group.
///
/// Field presence depends on the group type; everything is optional except
/// `pi`. The raw JSON map is retained for raw-topic publishing.
#[derive(Debug, Clone)]
pub struct DecodedGroup {
    pub pi: String,
    pub group: GroupType,
    pub group_label: String,
    pub timestamp: Option<String>,

    pub ps: Option<String>,
    pub partial_ps: Option<String>,
    pub long_ps: Option<String>,
    pub prog_type: Option<String>,
    pub tp: Option<bool>,
    pub ta: Option<bool>,
    pub is_music: Option<bool>,
    pub di: Option<Value>,
    pub country: Option<String>,
    pub language: Option<String>,
    pub radiotext: Option<String>,
    pub partial_radiotext: Option<String>,
    pub radiotext_plus: Option<RtPlus>,
    pub other_network: Option<OtherNetwork>,
    pub clock_time: Option<String>,
    pub prog_item_number: Option<i64>,
    pub prog_item_started: Option<Value>,
    pub open_data_app: Option<Value>,
    pub enhanced_radiotext: Option<String>,
    pub alt_frequencies: Option<Value>,
    pub bler: Option<f64>,

    /// The line as parsed, for `system/raw` publishing and the console.
    pub raw: Value,
}

#[derive(Debug, Deserialize)]
struct RawLine {
    pi: Option<String>,
    group: Option<String>,
    #[serde(rename = "rx_time")]
    _rx_time: Option<String>,
    timestamp: Option<String>,
    ps: Option<String>,
    partial_ps: Option<String>,
    long_ps: Option<String>,
    prog_type: Option<String>,
    tp: Option<bool>,
    ta: Option<bool>,
    is_music: Option<bool>,
    di: Option<Value>,
    country: Option<String>,
    language: Option<String>,
    radiotext: Option<String>,
    partial_radiotext: Option<String>,
    radiotext_plus: Option<RtPlus>,
    other_network: Option<OtherNetwork>,
    clock_time: Option<String>,
    prog_item_number: Option<i64>,
    prog_item_started: Option<Value>,
    open_data_app: Option<Value>,
    enhanced_radiotext: Option<String>,
    alt_frequencies_a: Option<Value>,
    alt_frequencies_b: Option<Value>,
    partial_alt_frequencies: Option<Value>,
    bler: Option<f64>,
}

impl DecodedGroup {
    /// Parse one line of decoder output.
    ///
    /// Returns `None` for valid JSON that carries no PI code (sync
    /// preambles, version banners); malformed JSON is an `Err` and is
    /// counted by the caller.
    pub fn parse(line: &str) -> Result<Option<Self>, serde_json::Error> {
        let raw: Value = serde_json::from_str(line)?;
        let parsed: RawLine = serde_json::from_value(raw.clone())?;
        let Some(pi) = parsed.pi else {
            return Ok(None);
        };

        let group_label = parsed.group.unwrap_or_default();
        let alt_frequencies = parsed
            .alt_frequencies_a
            .or(parsed.alt_frequencies_b)
            .or(parsed.partial_alt_frequencies);

        Ok(Some(Self {
            pi,
            group: GroupType::from_label(&group_label),
            group_label,
            timestamp: parsed.timestamp,
            ps: parsed.ps,
            partial_ps: parsed.partial_ps,
            long_ps: parsed.long_ps,
            prog_type: parsed.prog_type,
            tp: parsed.tp,
            ta: parsed.ta,
            is_music: parsed.is_music,
            di: parsed.di,
            country: parsed.country,
            language: parsed.language,
            radiotext: parsed.radiotext,
            partial_radiotext: parsed.partial_radiotext,
            radiotext_plus: parsed.radiotext_plus,
            other_network: parsed.other_network,
            clock_time: parsed.clock_time,
            prog_item_number: parsed.prog_item_number,
            prog_item_started: parsed.prog_item_started,
            open_data_app: parsed.open_data_app,
            enhanced_radiotext: parsed.enhanced_radiotext,
            alt_frequencies,
            bler: parsed.bler,
            raw,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_basic_group() {
        let g = DecodedGroup::parse(
            r#"{"pi":"0x9E04","group":"0A","ta":true,"tp":true,"ps":"P4 Sthlm"}"#,
        )
        .unwrap()
        .unwrap();
        assert_eq!(g.pi, "0x9E04");
        assert_eq!(g.group, GroupType::Basic);
        assert_eq!(g.ta, Some(true));
        assert_eq!(g.ps.as_deref(), Some("P4 Sthlm"));
    }

    #[test]
    fn parses_eon_group() {
        let g = DecodedGroup::parse(
            r#"{"pi":"0x9E04","group":"14A","other_network":{"pi":"0xC502","ta":true,"ps":"P4 Gbg"}}"#,
        )
        .unwrap()
        .unwrap();
        assert_eq!(g.group, GroupType::Eon);
        let on = g.other_network.unwrap();
        assert_eq!(on.pi.as_deref(), Some("0xC502"));
        assert_eq!(on.ta, Some(true));
    }

    #[test]
    fn unknown_group_falls_through() {
        let g = DecodedGroup::parse(r#"{"pi":"0x9E04","group":"11A"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(g.group, GroupType::Other("11A".to_string()));
        assert_eq!(g.group_label, "11A");
    }

    #[test]
    fn line_without_pi_is_skipped() {
        assert!(DecodedGroup::parse(r#"{"debug":"sync"}"#).unwrap().is_none());
    }

    #[test]
    fn malformed_line_is_an_error() {
        assert!(DecodedGroup::parse("not json").is_err());
    }

    #[test]
    fn parses_rt_plus_tags() {
        let g = DecodedGroup::parse(
            r#"{"pi":"0x9E04","group":"2A","radiotext_plus":{"item_running":true,"tags":[{"content-type":"item.artist","data":"Kent"},{"content-type":"item.title","data":"Ffö"}]}}"#,
        )
        .unwrap()
        .unwrap();
        let rtp = g.radiotext_plus.unwrap();
        assert_eq!(rtp.tags.len(), 2);
        assert_eq!(rtp.tags[0].content_type.as_deref(), Some("item.artist"));
    }
}
