//! Instruction prompts for the vision model. Column titles and section
//! vocabulary come from the keyword table so the model answers with the
//! same canonical titles the local pipeline produces.

use crate::config::KeywordConfig;

fn shift_titles(keywords: &KeywordConfig) -> String {
    keywords
        .shift_keywords
        .iter()
        .map(|s| format!("\"{}\"", s.title))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Names are quoted into the prompt; keep them on one line without quotes.
fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| if c == '"' || c.is_control() { ' ' } else { c })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Full-roster extraction prompt.
pub fn roster_prompt(keywords: &KeywordConfig) -> String {
    format!(
        "Eres un experto en leer cuadrantes de servicio. Analiza la imagen y extrae \
el cuadrante completo.\n\n\
INSTRUCCIONES:\n\
1. Cada columna es un turno. Usa estos títulos cuando correspondan: {titles}.\n\
2. Si no hay turnos visibles usa una sola columna titulada \"{catch_all}\".\n\
3. Los nombres bajo \"{outgoing}\" pertenecen a servicios salientes; escríbelos como \
\"({tag} <SERVICIO>) <NOMBRE>\".\n\
4. Copia los nombres tal cual aparecen, incluido el empleo (G.C., CABO, SGT...).\n\
5. Extrae la FECHA de la cabecera en formato YYYY-MM-DD, o null si no aparece.\n\n\
Responde SOLO con este JSON (sin markdown):\n\
{{\"date\": \"YYYY-MM-DD\", \"columns\": [{{\"title\": \"TURNO\", \"names\": [\"Nombre 1\"]}}]}}",
        titles = shift_titles(keywords),
        catch_all = keywords.catch_all_title,
        outgoing = keywords.outgoing_markers.join("/"),
        tag = keywords.outgoing_entry_tag,
    )
}

/// Targeted lookup prompt for one person.
pub fn lookup_prompt(keywords: &KeywordConfig, target_name: &str) -> String {
    format!(
        "Busca el turno de: \"{name}\".\n\n\
INSTRUCCIONES:\n\
1. Encuentra el nombre en la imagen.\n\
2. Identifica la COLUMNA (turno) a la que pertenece. Títulos posibles: {titles}.\n\
3. Si aparece bajo \"{outgoing}\", indica el servicio en \"service\".\n\
4. Lista a los compañeros de ese mismo bloque.\n\
5. Extrae la FECHA de la cabecera.\n\n\
Responde SOLO con este JSON (sin markdown):\n\
{{\"found\": true, \"date\": \"YYYY-MM-DD\", \"targetName\": \"Nombre tal cual aparece\", \
\"shift\": \"NOMBRE DEL TURNO\", \"service\": null, \"startTime\": \"HH:MM\", \
\"endTime\": \"HH:MM\", \"colleagues\": [\"Nombre 1\"]}}\n\
Si el nombre no aparece responde {{\"found\": false}}.",
        name = sanitize_name(target_name),
        titles = shift_titles(keywords),
        outgoing = keywords.outgoing_markers.join("/"),
    )
}
