use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{AppError, Result};
use crate::models::Template;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifyResult {
    pub template: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub risk: Option<String>,
    /// "P0" | "P1" | "P2"
    #[serde(default)]
    pub priority: Option<String>,
    #[serde(default)]
    pub sector: Option<String>,
    #[serde(default)]
    pub flag: Option<String>,
    #[serde(default)]
    pub requires_review: bool,
}

impl ClassifyResult {
    pub fn template(&self) -> Template {
        Template::parse_lenient(&self.template)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusConfirmacao {
    #[serde(rename = "confirmado")]
    Confirmado,
    #[serde(rename = "alegação — não confirmada")]
    AlegacaoNaoConfirmada,
    #[serde(rename = "em apuração")]
    EmApuracao,
}

/// Intel analysis layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnaliseIntelPayload {
    pub tema: String,
    pub status_confirmacao: StatusConfirmacao,
    pub leitura_rapida: Vec<String>,
    pub por_que_importa: Vec<String>,
    pub checklist_osint: Vec<String>,
    pub insight_central: String,
}

impl AnaliseIntelPayload {
    pub fn validate(&self) -> Result<()> {
        exact_len("leitura_rapida", &self.leitura_rapida, 3)?;
        exact_len("por_que_importa", &self.por_que_importa, 2)?;
        exact_len("checklist_osint", &self.checklist_osint, 3)
    }
}

/// Sector flash layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlashSetorialPayload {
    pub setor: String,
    pub flag_emoji: String,
    pub linha_1: String,
    pub em_destaque: Vec<String>,
    pub insight: String,
}

impl FlashSetorialPayload {
    pub fn validate(&self) -> Result<()> {
        exact_len("em_destaque", &self.em_destaque, 3)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateResult {
    #[serde(default = "empty_object")]
    pub payload: Value,
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

fn exact_len(field: &str, items: &[String], want: usize) -> Result<()> {
    if items.len() != want {
        return Err(AppError::Validation(format!(
            "{field} must have exactly {want} items, got {}",
            items.len()
        )));
    }
    Ok(())
}

/// Checks `payload` against the layout for `template` and returns it in canonical form.
/// Templates without a fixed layout accept any object.
pub fn validate_generate_payload(payload: Value, template: Template) -> Result<Value> {
    match template {
        Template::AnaliseIntel => {
            let parsed: AnaliseIntelPayload = serde_json::from_value(payload)
                .map_err(|e| AppError::Validation(format!("ANALISE_INTEL payload: {e}")))?;
            parsed.validate()?;
            Ok(serde_json::to_value(parsed)?)
        }
        Template::FlashSetorial => {
            let parsed: FlashSetorialPayload = serde_json::from_value(payload)
                .map_err(|e| AppError::Validation(format!("FLASH_SETORIAL payload: {e}")))?;
            parsed.validate()?;
            Ok(serde_json::to_value(parsed)?)
        }
        Template::Default => Ok(payload),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn intel(leitura: Vec<&str>) -> Value {
        json!({
            "tema": "Acordo com a SEC",
            "status_confirmacao": "alegação — não confirmada",
            "leitura_rapida": leitura,
            "por_que_importa": ["a", "b"],
            "checklist_osint": ["x", "y", "z"],
            "insight_central": "insight"
        })
    }

    #[test]
    fn intel_requires_exactly_three_quick_reads() {
        assert!(matches!(
            validate_generate_payload(intel(vec!["1", "2"]), Template::AnaliseIntel),
            Err(AppError::Validation(_))
        ));
        let ok = validate_generate_payload(intel(vec!["1", "2", "3"]), Template::AnaliseIntel).unwrap();
        assert_eq!(ok["leitura_rapida"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn intel_rejects_unknown_confirmation_status() {
        let mut payload = intel(vec!["1", "2", "3"]);
        payload["status_confirmacao"] = json!("talvez");
        assert!(validate_generate_payload(payload, Template::AnaliseIntel).is_err());
    }

    #[test]
    fn flash_requires_three_highlights() {
        let payload = json!({
            "setor": "Defesa",
            "flag_emoji": "🇧🇷",
            "linha_1": "Linha",
            "em_destaque": ["a", "b", "c", "d"],
            "insight": "i"
        });
        assert!(validate_generate_payload(payload, Template::FlashSetorial).is_err());
    }

    #[test]
    fn default_template_passes_through() {
        let payload = json!({"headline": "x"});
        assert_eq!(
            validate_generate_payload(payload.clone(), Template::Default).unwrap(),
            payload
        );
    }

    #[test]
    fn classify_result_defaults() {
        let c: ClassifyResult = serde_json::from_str(r#"{"template": "FLASH_SETORIAL"}"#).unwrap();
        assert_eq!(c.template(), Template::FlashSetorial);
        assert!(!c.requires_review);
        assert!(c.sector.is_none());
    }
}
