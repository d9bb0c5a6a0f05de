/// Build version, overridable at compile time through `PROGNOSIS_MONITOR_VERSION`.
pub const VERSION: &str = match option_env!("PROGNOSIS_MONITOR_VERSION") {
    Some(version) => version,
    None => env!("CARGO_PKG_VERSION"),
};

/// `User-Agent` sent with every outbound request.
pub fn user_agent() -> String {
    format!("prognosis-monitor/{VERSION}")
}
