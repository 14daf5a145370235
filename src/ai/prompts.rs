use crate::models::Template;

pub const CLASSIFY_SYSTEM: &str = r#"Você classifica itens de notícia em template, risk, priority, sector, flag e se requer revisão.
Responda APENAS com JSON válido, sem markdown nem texto extra.
Schema: {"template": string, "reason": string|null, "risk": string|null, "priority": "P0"|"P1"|"P2", "sector": string|null, "flag": string|null, "requires_review": boolean}
template deve ser "ANALISE_INTEL" ou "FLASH_SETORIAL". reason explica brevemente a classificação."#;

const GENERATE_SYSTEM_ANALISE: &str = r#"Você produz um payload de publicação no template ANALISE_INTEL a partir do item.
Responda APENAS com JSON válido no formato: {"payload": { ... }}. Sem markdown, sem cercas de código.
O objeto payload deve ter exatamente:
- "tema": string (tema principal)
- "status_confirmacao": "confirmado" | "alegação — não confirmada" | "em apuração"
- "leitura_rapida": array de exatamente 3 strings
- "por_que_importa": array de exatamente 2 strings
- "checklist_osint": array de exatamente 3 strings
- "insight_central": string (1 a 2 linhas)"#;

const GENERATE_SYSTEM_FLASH: &str = r#"Você produz um payload de publicação no template FLASH_SETORIAL a partir do item.
Responda APENAS com JSON válido no formato: {"payload": { ... }}. Sem markdown, sem cercas de código.
O objeto payload deve ter exatamente:
- "setor": string
- "flag_emoji": string (um emoji)
- "linha_1": string
- "em_destaque": array de exatamente 3 strings
- "insight": string (1 linha)"#;

const GENERATE_SYSTEM_DEFAULT: &str = r#"Você produz um payload de publicação a partir do item.
Responda APENAS com JSON válido: {"payload": { ... }}. Sem markdown, sem cercas de código."#;

/// Appended to the user prompt on the single repair attempt.
pub const STRICT_JSON_REPAIR: &str =
    "\n\nCORREÇÃO: A saída deve ser exatamente um objeto JSON válido, sem outro texto.";

pub fn classify_prompt(title: &str, summary: &str, source_name: &str) -> String {
    let mut parts = vec![format!("Título: {title}")];
    if !summary.is_empty() {
        parts.push(format!("Resumo: {summary}"));
    }
    if !source_name.is_empty() {
        parts.push(format!("Fonte: {source_name}"));
    }
    parts.push(
        "\nRetorne somente JSON: template (ANALISE_INTEL ou FLASH_SETORIAL), reason, risk, priority (P0/P1/P2), sector, flag, requires_review."
            .to_string(),
    );
    parts.join("\n")
}

pub fn generate_system(template: Template) -> &'static str {
    match template {
        Template::AnaliseIntel => GENERATE_SYSTEM_ANALISE,
        Template::FlashSetorial => GENERATE_SYSTEM_FLASH,
        Template::Default => GENERATE_SYSTEM_DEFAULT,
    }
}

pub fn generate_prompt(title: &str, summary: &str, template: Template, risk: &str) -> String {
    let mut parts = vec![format!("Template: {template}"), format!("Título: {title}")];
    if !summary.is_empty() {
        parts.push(format!("Resumo: {summary}"));
    }
    if !risk.is_empty() {
        parts.push(format!("Risk: {risk}"));
    }
    parts.push(
        "\nRetorne somente JSON: {\"payload\": { ... }} com os campos exatos do template."
            .to_string(),
    );
    parts.join("\n")
}
