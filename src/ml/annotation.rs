/// Marker the model returns for every language when it sees a liquidation stamp.
pub const LIQUIDATION: &str = "LIQUIDATION";

const SENTINEL_LINES: [&str; 3] = ["EN: LIQUIDATION", "FR: LIQUIDATION", "DE: LIQUIDATION"];

const SHORT_LABELS: [&str; 3] = ["EN:", "FR:", "DE:"];
const LONG_LABELS: [&str; 3] = ["English:", "French:", "German:"];

/// Descriptions of one item in English, French and German.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Annotation {
    pub en: String,
    pub fr: String,
    pub de: String,
}

impl Annotation {
    pub fn liquidation() -> Self {
        Self {
            en: LIQUIDATION.to_string(),
            fr: LIQUIDATION.to_string(),
            de: LIQUIDATION.to_string(),
        }
    }

    pub fn is_liquidation(&self) -> bool {
        self.en == LIQUIDATION && self.fr == LIQUIDATION && self.de == LIQUIDATION
    }

    /// At least one language is filled in.
    pub fn has_any(&self) -> bool {
        !(self.en.is_empty() && self.fr.is_empty() && self.de.is_empty())
    }
}

/// What the store knows about an item, passed to the model as context.
#[derive(Debug, Clone, PartialEq)]
pub struct ArticleContext {
    pub id: i64,
    pub description: Option<String>,
}

/// Turns the raw model reply into an [`Annotation`].
///
/// The liquidation sentinel wins over anything else in the text. Labels are
/// matched case-insensitively; a segment runs until the next other label of
/// the same family or the end of the text. Missing languages stay empty.
pub fn parse_response(text: &str) -> Annotation {
    if SENTINEL_LINES.iter().all(|line| text.contains(line)) {
        return Annotation::liquidation();
    }

    let mut values = [String::new(), String::new(), String::new()];
    for family in [SHORT_LABELS, LONG_LABELS] {
        for (i, value) in values.iter_mut().enumerate() {
            if value.is_empty() {
                *value = extract_segment(text, &family, i);
            }
        }
    }

    let [en, fr, de] = values;
    Annotation { en, fr, de }
}

fn extract_segment(text: &str, labels: &[&str; 3], index: usize) -> String {
    // ASCII lowering keeps byte offsets aligned with `text`
    let lowered = text.to_ascii_lowercase();
    let label = labels[index].to_ascii_lowercase();

    let Some(pos) = lowered.find(&label) else {
        return String::new();
    };
    let start = pos + label.len();

    let end = labels
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != index)
        .filter_map(|(_, other)| lowered[start..].find(&other.to_ascii_lowercase()))
        .min()
        .map(|offset| start + offset)
        .unwrap_or(text.len());

    text[start..end].trim().to_string()
}
