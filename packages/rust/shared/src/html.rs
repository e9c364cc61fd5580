//! CSS selector helpers shared by the fetch and parse stages.

use scraper::Selector;

use crate::error::{HarvestError, Result};

/// Parse a CSS selector, mapping failures into the crate error type.
pub fn parse_selector(selector: &str) -> Result<Selector> {
    Selector::parse(selector)
        .map_err(|e| HarvestError::parse(format!("invalid selector {selector:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_and_invalid_selectors() {
        assert!(parse_selector("div.bix-div-container").is_ok());

        let err = parse_selector("div[").unwrap_err();
        assert!(matches!(err, HarvestError::Parse { .. }));
        assert!(err.to_string().contains("div["));
    }
}
