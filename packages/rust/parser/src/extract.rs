//! Field extraction from one item block.

use scraper::{ElementRef, Html, Selector};

use quizharvest_shared::{
    DropReason, NOT_AVAILABLE, NormalizedRecord, OPTION_COUNT, RawItem, Result, StepOutcome,
    parse_selector,
};

/// CSS selectors for each field of an item block.
#[derive(Debug, Clone)]
pub struct FieldSelectors {
    question: Selector,
    options_block: Selector,
    option_value: Selector,
    answer: Selector,
    explanation: Selector,
}

impl FieldSelectors {
    /// Build from selector strings.
    pub fn new(
        question: &str,
        options_block: &str,
        option_value: &str,
        answer: &str,
        explanation: &str,
    ) -> Result<Self> {
        Ok(Self {
            question: parse_selector(question)?,
            options_block: parse_selector(options_block)?,
            option_value: parse_selector(option_value)?,
            answer: parse_selector(answer)?,
            explanation: parse_selector(explanation)?,
        })
    }

    /// Selectors matching the source site's question markup.
    pub fn site_default() -> Result<Self> {
        Self::new(
            "div.bix-td-qtxt",
            "div.bix-tbl-options",
            "div.bix-td-option-val",
            "input.jq-hdnakq",
            "div.bix-ans-description",
        )
    }
}

/// Text content with every text node trimmed and empty nodes dropped.
fn stripped_text(el: ElementRef<'_>) -> String {
    el.text().map(str::trim).filter(|t| !t.is_empty()).collect()
}

/// Turn one raw item into a record, or say why it was dropped.
pub fn parse_item(item: &RawItem, selectors: &FieldSelectors) -> StepOutcome<NormalizedRecord> {
    let doc = Html::parse_fragment(&item.content);

    let options: Vec<String> = doc
        .select(&selectors.options_block)
        .next()
        .map(|block| block.select(&selectors.option_value).map(stripped_text).collect())
        .unwrap_or_default();
    if options.len() != OPTION_COUNT {
        return StepOutcome::Dropped(DropReason::WrongOptionCount {
            found: options.len(),
        });
    }

    let question = doc
        .select(&selectors.question)
        .next()
        .map(stripped_text)
        .unwrap_or_else(|| NOT_AVAILABLE.to_string());

    let answer = match doc.select(&selectors.answer).next() {
        Some(input) => match input.value().attr("value") {
            Some(value) => value.to_string(),
            None => {
                return StepOutcome::Dropped(DropReason::Malformed(
                    "answer marker has no value attribute".into(),
                ));
            }
        },
        None => NOT_AVAILABLE.to_string(),
    };

    let explanation = doc
        .select(&selectors.explanation)
        .next()
        .map(stripped_text)
        .unwrap_or_else(|| NOT_AVAILABLE.to_string());

    StepOutcome::Ok(NormalizedRecord {
        question,
        options,
        answer,
        explanation,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn item_html(options: usize, with_extras: bool) -> String {
        let opts: String = (0..options)
            .map(|i| {
                format!(
                    r#"<div class="bix-opt-row"><div class="bix-td-option">{}</div>
                       <div class="bix-td-option-val"> <span>Option</span> {i} </div></div>"#,
                    (b'A' + i as u8) as char
                )
            })
            .collect();
        let extras = if with_extras {
            r#"<input type="hidden" class="jq-hdnakq" value="C">
               <div class="bix-ans-description"> Speed = <b>72</b> km/hr. </div>"#
        } else {
            ""
        };
        format!(
            r#"<div class="bix-div-container">
                 <div class="bix-td-qtxt"> A train <i>120 m</i> long passes a pole in 6 s. </div>
                 <div class="bix-tbl-options">{opts}</div>
                 {extras}
               </div>"#
        )
    }

    fn raw(content: String) -> RawItem {
        RawItem {
            source_path: PathBuf::from("0.html"),
            sequence_index: 0,
            content,
        }
    }

    #[test]
    fn full_item_has_no_sentinels() {
        let selectors = FieldSelectors::site_default().unwrap();
        let record = parse_item(&raw(item_html(4, true)), &selectors).ok().unwrap();

        assert_eq!(record.question, "A train120 mlong passes a pole in 6 s.");
        assert_eq!(record.options, ["Option0", "Option1", "Option2", "Option3"]);
        assert_eq!(record.answer, "C");
        assert_eq!(record.explanation, "Speed =72km/hr.");
        assert!(!record.has_sentinels());
    }

    #[test]
    fn missing_fields_become_sentinels() {
        let selectors = FieldSelectors::site_default().unwrap();
        let record = parse_item(&raw(item_html(4, false)), &selectors).ok().unwrap();
        assert_eq!(record.answer, NOT_AVAILABLE);
        assert_eq!(record.explanation, NOT_AVAILABLE);
        assert!(record.has_sentinels());
    }

    #[test]
    fn wrong_option_count_is_dropped() {
        let selectors = FieldSelectors::site_default().unwrap();
        for count in [0, 3, 5] {
            match parse_item(&raw(item_html(count, true)), &selectors) {
                StepOutcome::Dropped(DropReason::WrongOptionCount { found }) => {
                    assert_eq!(found, count)
                }
                other => panic!("expected drop for {count} options, got {other:?}"),
            }
        }
    }

    #[test]
    fn answer_marker_without_value_is_dropped() {
        let selectors = FieldSelectors::site_default().unwrap();
        let html = format!(r#"{}<input class="jq-hdnakq">"#, item_html(4, false));
        assert!(matches!(
            parse_item(&raw(html), &selectors),
            StepOutcome::Dropped(DropReason::Malformed(_))
        ));
    }

    #[test]
    fn garbage_markup_is_dropped_not_raised() {
        let selectors = FieldSelectors::site_default().unwrap();
        let outcome = parse_item(&raw("<<<not html at all".into()), &selectors);
        assert!(matches!(outcome, StepOutcome::Dropped(_)));
    }

    #[test]
    fn invalid_custom_selector_is_rejected() {
        assert!(FieldSelectors::new("div[", "a", "b", "c", "d").is_err());
    }
}
