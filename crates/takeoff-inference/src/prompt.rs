//! Deterministic prompt rendering for pattern classification.
//!
//! The rendered text depends only on the pattern content, never on the time
//! of aggregation, so identical patterns produce byte-identical prompts and
//! the rendered prompt cache can key on the pattern's stats digest.

use takeoff_core::{defaults, Dimension, DimensionStatistics, Pattern, UNSET};

/// Layout version of [`PromptModelBuilder::render`].
///
/// Bump whenever the rendered layout changes; cached prompts carrying an
/// older version are ignored.
pub const TEMPLATE_VERSION: u32 = 1;

/// System context for the generation backend: task description and the
/// exact JSON shape the answer must have.
pub const SYSTEM_PROMPT: &str = r#"You classify groups of BIM (building information model) elements for quantity takeoff.
You receive one pattern: the shared category, family, type, material and location of a group of elements, how many elements it covers, and summary statistics of their dimensions in millimetres.
Propose the commodity code and pricing code that best fit the whole group, and any derived items (insulation, hangers, fittings, coatings) whose quantity follows from the element dimensions.

Respond with a single JSON object and nothing else:
{
  "suggested_commodity_code": string or null,
  "suggested_pricing_code": string or null,
  "derived_items": [
    {
      "derived_commodity_code": string,
      "derived_pricing_code": string or null,
      "quantity_formula": string,
      "quantity_unit": string
    }
  ],
  "reasoning_summary": string
}

Rules:
- quantity_formula is arithmetic (+ - * / and parentheses) over length_mm, width_mm, height_mm, diameter_mm and numbers.
- Give at least one code or one derived item.
- reasoning_summary is one or two sentences explaining the choice.
- Do not add other fields."#;

/// Renders a [`Pattern`] into the user prompt for the generation backend.
#[derive(Debug, Clone)]
pub struct PromptModelBuilder {
    max_bytes: usize,
    metadata_value_max_chars: usize,
}

impl Default for PromptModelBuilder {
    fn default() -> Self {
        Self {
            max_bytes: defaults::PROMPT_MAX_BYTES,
            metadata_value_max_chars: defaults::PROMPT_METADATA_VALUE_MAX_CHARS,
        }
    }
}

impl PromptModelBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the hard cap on rendered size in bytes.
    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub fn template_version(&self) -> u32 {
        TEMPLATE_VERSION
    }

    /// Render the prompt for one pattern.
    ///
    /// Output never exceeds `max_bytes`. Metadata lines that would cross the
    /// cap are dropped whole; if the fixed part alone is too long the text is
    /// cut at the last char boundary under the cap.
    pub fn render(&self, pattern: &Pattern) -> String {
        let mut out = String::with_capacity(self.max_bytes.min(4096));
        out.push_str("Classify this BIM element pattern.\n\n");

        for (label, value) in pattern.key.fields() {
            if label != "category" && value == UNSET {
                continue;
            }
            push_line(&mut out, &format!("{label}: {value}"));
        }
        push_line(&mut out, &format!("elements: {}", pattern.element_count));

        if !pattern.samples.is_empty() {
            let ids: Vec<&str> = pattern
                .samples
                .iter()
                .map(|s| s.external_id.as_str())
                .collect();
            push_line(&mut out, &format!("samples: {}", ids.join(", ")));
        }

        let present: Vec<(Dimension, DimensionStatistics)> = Dimension::ALL
            .into_iter()
            .map(|d| (d, pattern.stats(d)))
            .filter(|(_, s)| !s.is_empty())
            .collect();
        if !present.is_empty() {
            out.push_str("\ndimensions (mm):\n");
            for (dimension, stats) in present {
                push_line(&mut out, &format!("  {}", dimension_line(dimension, &stats)));
            }
        }

        if !pattern.metadata.is_empty() && out.len() < self.max_bytes {
            let heading = "\nmetadata:\n";
            let mut section = String::new();
            for (key, value) in &pattern.metadata {
                let line = format!(
                    "  {}: {}\n",
                    single_line(key),
                    self.truncate_value(&single_line(value))
                );
                if out.len() + heading.len() + section.len() + line.len() > self.max_bytes {
                    continue;
                }
                section.push_str(&line);
            }
            if !section.is_empty() {
                out.push_str(heading);
                out.push_str(&section);
            }
        }

        if out.len() > self.max_bytes {
            let mut cut = self.max_bytes;
            while !out.is_char_boundary(cut) {
                cut -= 1;
            }
            out.truncate(cut);
        }
        out
    }

    fn truncate_value(&self, value: &str) -> String {
        if value.chars().count() <= self.metadata_value_max_chars {
            return value.to_string();
        }
        let mut truncated: String = value.chars().take(self.metadata_value_max_chars).collect();
        truncated.push('…');
        truncated
    }
}

fn push_line(out: &mut String, line: &str) {
    out.push_str(line);
    out.push('\n');
}

fn single_line(value: &str) -> String {
    value
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect()
}

fn fmt_opt(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{v:.1}"),
        None => "n/a".to_string(),
    }
}

fn dimension_line(dimension: Dimension, stats: &DimensionStatistics) -> String {
    format!(
        "{}: count={} min={} max={} mean={} stddev={} p50={} p95={}",
        dimension,
        stats.count,
        fmt_opt(stats.min),
        fmt_opt(stats.max),
        fmt_opt(stats.mean),
        fmt_opt(stats.stddev),
        fmt_opt(stats.p50),
        fmt_opt(stats.p95),
    )
}
