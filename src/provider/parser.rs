//! Subscription parsing

use serde::Deserialize;

use crate::config::OutboundConfig;
use crate::error::ProviderError;

/// Turns subscription content into outbound records
///
/// Identical input must produce identical, identically ordered output.
pub trait SubscriptionParser: Send + Sync {
    /// Parse subscription content
    ///
    /// # Errors
    ///
    /// Returns `ProviderError::Parse` if the content is malformed.
    fn parse(&self, content: &str) -> Result<Vec<OutboundConfig>, ProviderError>;
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Document {
    Wrapped { outbounds: Vec<OutboundConfig> },
    List(Vec<OutboundConfig>),
}

/// Parser for JSON subscriptions
///
/// Accepts either `{"outbounds": [...]}` or a bare array of outbound
/// records. Blank content is rejected; an explicit `[]` is an empty
/// subscription.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSubscriptionParser;

impl SubscriptionParser for JsonSubscriptionParser {
    fn parse(&self, content: &str) -> Result<Vec<OutboundConfig>, ProviderError> {
        if content.trim().is_empty() {
            return Err(ProviderError::parse("empty subscription"));
        }

        let outbounds = match serde_json::from_str::<Document>(content) {
            Ok(Document::Wrapped { outbounds } | Document::List(outbounds)) => outbounds,
            Err(e) => return Err(ProviderError::parse(e.to_string())),
        };

        for (index, outbound) in outbounds.iter().enumerate() {
            outbound
                .validate()
                .map_err(|e| ProviderError::parse(format!("outbound {index}: {e}")))?;
        }

        Ok(outbounds)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OutboundType;

    #[test]
    fn test_parse_wrapped() {
        let content = r#"{"outbounds": [
            {"tag": "hk-01", "type": "direct", "routing_mark": 200},
            {"tag": "ads", "type": "block"}
        ]}"#;
        let outbounds = JsonSubscriptionParser.parse(content).unwrap();
        assert_eq!(outbounds.len(), 2);
        assert_eq!(outbounds[0].tag, "hk-01");
        assert_eq!(outbounds[0].routing_mark, Some(200));
        assert_eq!(outbounds[1].outbound_type, OutboundType::Block);
    }

    #[test]
    fn test_parse_bare_array_keeps_order() {
        let content = r#"[{"tag": "b", "type": "direct"}, {"tag": "a", "type": "direct"}]"#;
        let tags: Vec<_> = JsonSubscriptionParser
            .parse(content)
            .unwrap()
            .into_iter()
            .map(|o| o.tag)
            .collect();
        assert_eq!(tags, vec!["b", "a"]);
    }

    #[test]
    fn test_parse_blank_is_rejected() {
        assert!(matches!(
            JsonSubscriptionParser.parse(""),
            Err(ProviderError::Parse(_))
        ));
        assert!(matches!(
            JsonSubscriptionParser.parse("  \n"),
            Err(ProviderError::Parse(_))
        ));
        assert!(JsonSubscriptionParser.parse("[]").unwrap().is_empty());
        assert!(JsonSubscriptionParser
            .parse(r#"{"outbounds": []}"#)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(
            JsonSubscriptionParser.parse("{not json"),
            Err(ProviderError::Parse(_))
        ));
        assert!(matches!(
            JsonSubscriptionParser.parse(r#"[{"tag": "x", "type": "vmess"}]"#),
            Err(ProviderError::Parse(_))
        ));
        assert!(matches!(
            JsonSubscriptionParser.parse(r#"[{"tag": " ", "type": "direct"}]"#),
            Err(ProviderError::Parse(_))
        ));
    }
}
