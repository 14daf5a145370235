//! Message layouts for the two publication templates, and line-aware splitting.
//!
//! Lengths are counted in characters, not bytes: headers and bullets carry emoji and
//! accented text.

use serde_json::Value;

use crate::models::Template;

pub const HEADER_INTEL: &str = "🚨 GNI — Análise de Inteligência";
pub const HEADER_FLASH_PREFIX: &str = "🚨 GNI |";
pub const SEPARATOR: &str = "⸻";
const BULLET: &str = "\t• ";
const CHECK_BULLET: &str = "\t• ✅ ";
const DEFAULT_SECTOR: &str = "Setor";

pub const LABEL_TEMA: &str = "Tema:";
pub const LABEL_LEITURA_RAPIDA: &str = "Leitura rápida";
pub const LABEL_POR_QUE_IMPORTA: &str = "Por que isso importa";
pub const LABEL_CHECKLIST_OSINT: &str = "Como validar (checklist OSINT)";
pub const LABEL_INSIGHT_CENTRAL: &str = "Insight central";
pub const LABEL_EM_DESTAQUE: &str = "Em destaque:";
pub const LABEL_INSIGHT: &str = "📌 Insight:";

const INTEL_KEYS: [&str; 5] = [
    "tema",
    "leitura_rapida",
    "por_que_importa",
    "checklist_osint",
    "insight_central",
];
const FLASH_KEYS: [&str; 4] = ["setor", "linha_1", "em_destaque", "insight"];

/// Renders `payload` for `template` and splits it into messages of at most `max_chars`.
/// The flash layout takes `setor`/`flag_emoji` from the payload before the arguments.
pub fn render(
    template: Template,
    payload: &Value,
    sector: Option<&str>,
    flag: Option<&str>,
    max_chars: usize,
) -> Vec<String> {
    let text = match template {
        Template::FlashSetorial => render_flash(sector, flag, payload),
        _ => render_intel(payload),
    };
    split_message(&text, max_chars)
}

/// Re-splits already rendered parts against a channel's hard wire limit.
pub fn fit_to_limit(parts: &[String], limit: usize) -> Vec<String> {
    parts
        .iter()
        .flat_map(|part| split_message(part, limit))
        .collect()
}

pub fn render_intel(payload: &Value) -> String {
    let mut out = Sections::new(HEADER_INTEL);

    if has_any(payload, &INTEL_KEYS) {
        out.labelled(LABEL_TEMA, &text(payload, "tema"));
        out.bullets(LABEL_LEITURA_RAPIDA, &list(payload, "leitura_rapida"), BULLET);
        out.bullets(LABEL_POR_QUE_IMPORTA, &list(payload, "por_que_importa"), BULLET);
        out.bullets(LABEL_CHECKLIST_OSINT, &list(payload, "checklist_osint"), CHECK_BULLET);
        out.labelled(LABEL_INSIGHT_CENTRAL, &text(payload, "insight_central"));
    } else {
        out.labelled(LABEL_TEMA, &text(payload, "headline"));
        out.body_lines(None, &text(payload, "body"));
        out.bullet_block(None, &list(payload, "bullets"));
    }

    out.finish()
}

pub fn render_flash(sector: Option<&str>, flag: Option<&str>, payload: &Value) -> String {
    let setor_text = text(payload, "setor");
    let sector = first_non_empty(&[&setor_text, sector.unwrap_or("")])
        .unwrap_or(DEFAULT_SECTOR);
    let flag_text = text(payload, "flag_emoji");
    let flag = first_non_empty(&[&flag_text, flag.unwrap_or("")]).unwrap_or("");
    let header = format!("{HEADER_FLASH_PREFIX} {sector} {flag}");
    let mut out = Sections::new(header.trim_end());

    if has_any(payload, &FLASH_KEYS) {
        out.line(&text(payload, "linha_1"));
        out.bullets(LABEL_EM_DESTAQUE, &list(payload, "em_destaque"), BULLET);
        let insight = text(payload, "insight");
        if !insight.is_empty() {
            out.line(&format!("{LABEL_INSIGHT} {insight}"));
        }
    } else {
        out.line(&text(payload, "headline"));
        out.body_lines(Some(LABEL_EM_DESTAQUE), &text(payload, "body"));
        out.bullet_block(Some(LABEL_EM_DESTAQUE), &list(payload, "bullets"));
    }

    out.finish()
}

/// Splits `text` into parts of at most `max_chars`. The first line of the text stays at the
/// top of the first part; later parts carry the remaining lines. A cut prefers the last line
/// break in the second half of the budget.
pub fn split_message(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut parts = Vec::new();
    let mut remaining = text.to_string();

    while char_len(&remaining) > max_chars {
        let (header, rest) = match remaining.find('\n') {
            Some(i) => remaining.split_at(i + 1),
            None => (remaining.as_str(), ""),
        };
        let header_len = char_len(header);

        if header_len >= max_chars {
            let cut = byte_offset(&remaining, max_chars);
            let (head, tail) = remaining.split_at(cut);
            push_part(&mut parts, head);
            remaining = tail.to_string();
            continue;
        }

        let rest = rest.trim_start_matches('\n');
        let budget = max_chars - header_len;
        let cut = byte_offset(rest, budget);
        let window = &rest[..cut];
        let (body, next) = match window.rfind('\n') {
            Some(nl) if char_len(&window[..nl]) > budget / 2 => {
                (window[..nl + 1].trim_end(), &rest[nl + 1..])
            }
            _ => (window, &rest[cut..]),
        };

        push_part(&mut parts, &format!("{header}{body}"));
        remaining = next.trim_start_matches('\n').to_string();
    }

    push_part(&mut parts, &remaining);
    parts
}

fn push_part(parts: &mut Vec<String>, part: &str) {
    let part = part.trim_end();
    if !part.is_empty() {
        parts.push(part.to_string());
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Byte offset of the `n`th char, or the string length.
fn byte_offset(s: &str, n: usize) -> usize {
    s.char_indices().nth(n).map(|(i, _)| i).unwrap_or(s.len())
}

/// Blank-line separated sections under a header, closed by the separator.
struct Sections {
    lines: Vec<String>,
}

impl Sections {
    fn new(header: &str) -> Self {
        Self {
            lines: vec![header.to_string(), String::new()],
        }
    }

    fn line(&mut self, value: &str) {
        if !value.is_empty() {
            self.lines.push(value.to_string());
            self.lines.push(String::new());
        }
    }

    fn labelled(&mut self, label: &str, value: &str) {
        if !value.is_empty() {
            self.lines.push(label.to_string());
            self.line(value);
        }
    }

    fn bullets(&mut self, label: &str, items: &[String], prefix: &str) {
        if items.is_empty() {
            return;
        }
        self.lines.push(label.to_string());
        self.lines
            .extend(items.iter().map(|item| format!("{prefix}{item}")));
        self.lines.push(String::new());
    }

    fn bullet_block(&mut self, label: Option<&str>, items: &[String]) {
        match label {
            Some(label) => self.bullets(label, items, BULLET),
            None if !items.is_empty() => {
                self.lines
                    .extend(items.iter().map(|item| format!("{BULLET}{item}")));
                self.lines.push(String::new());
            }
            None => {}
        }
    }

    /// Legacy free-text body: every non-blank line becomes a bullet.
    fn body_lines(&mut self, label: Option<&str>, body: &str) {
        let items: Vec<String> = body
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
            .collect();
        self.bullet_block(label, &items);
    }

    fn finish(mut self) -> String {
        self.lines.push(SEPARATOR.to_string());
        self.lines.join("\n").trim_matches('\n').to_string()
    }
}

fn has_any(payload: &Value, keys: &[&str]) -> bool {
    keys.iter().any(|key| match payload.get(*key) {
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::Null) | None => false,
        Some(Value::Bool(b)) => *b,
        Some(_) => true,
    })
}

fn text(payload: &Value, key: &str) -> String {
    match payload.get(key) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn list(payload: &Value, key: &str) -> Vec<String> {
    let Some(Value::Array(items)) = payload.get(key) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(s.trim().to_string()),
            Value::Null => None,
            other => Some(other.to_string()),
        })
        .filter(|s| !s.is_empty())
        .collect()
}

fn first_non_empty<'a>(candidates: &[&'a str]) -> Option<&'a str> {
    candidates
        .iter()
        .map(|c| c.trim())
        .find(|c| !c.is_empty())
}
