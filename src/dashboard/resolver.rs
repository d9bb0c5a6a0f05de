use once_cell::sync::Lazy;
use scraper::{Html, Selector};

static WITH_ID: Lazy<Selector> =
    Lazy::new(|| Selector::parse("[id]").expect("static selector is valid"));
static SCRIPT: Lazy<Selector> =
    Lazy::new(|| Selector::parse("script").expect("static selector is valid"));

/// Finds the opaque widget guid in the dashboard page markup.
///
/// The widget element embeds a script whose configuration object carries a
/// `guid: "<value>",` line.
pub fn extract_guid(markup: &str, widget_id: &str) -> Option<String> {
    let document = Html::parse_document(markup);
    document
        .select(&WITH_ID)
        .filter(|element| element.value().id() == Some(widget_id))
        .flat_map(|element| element.select(&SCRIPT).collect::<Vec<_>>())
        .find_map(|script| {
            let source: String = script.text().collect();
            source.lines().find_map(guid_from_line)
        })
}

/// Reads `guid: "<value>",`; the token must be a whole word followed by `:`.
fn guid_from_line(line: &str) -> Option<String> {
    line.match_indices("guid").find_map(|(at, token)| {
        let word_start = line[..at]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric() && c != '_');
        let rest = line[at + token.len()..].trim_start();
        let rest = rest.strip_prefix(':').filter(|_| word_start)?;
        let guid: String = rest
            .chars()
            .filter(|c| *c != '"' && *c != '\'' && *c != ',')
            .collect();
        let guid = guid.trim();
        (!guid.is_empty()).then(|| guid.to_string())
    })
}
