//! Persisted key layout.

pub const CODE_NAME_FIELD: &str = "股票简称";
pub const INDICATOR_HEAT_FIELD: &str = "热度值";
pub const THEME_DETAIL_PATTERN: &str = "theme:detail:*";
pub const THEME_DETAIL_PREFIX: &str = "theme:detail:";

/// Fields of a per-(theme, entity) detail hash, in read order.
pub const THEME_DETAIL_FIELDS: [&str; 5] = ["desc", "theme", "name", "hot_num", "trade_date"];

pub fn factor(label: &str) -> String {
    format!("factor:{label}")
}

pub fn theme(name: &str) -> String {
    format!("theme:{name}")
}

pub fn theme_detail(name: &str, code: &str) -> String {
    format!("{THEME_DETAIL_PREFIX}{name}:{code}")
}

pub fn indicator(name: &str) -> String {
    format!("zhibiao:{name}")
}

pub fn indicator_heat(name: &str, code: &str) -> String {
    format!("zhibiao:{name}:{code}")
}

pub fn code(id: &str) -> String {
    format!("code:{id}")
}

pub fn session(token: &str) -> String {
    format!("session:{token}")
}

/// Theme name of a `theme:detail:{name}:{id}` key.
///
/// The entity id never contains `:`, so the name is everything between the
/// prefix and the last separator.
pub fn theme_name_of_detail(key: &str) -> Option<&str> {
    let rest = key.strip_prefix(THEME_DETAIL_PREFIX)?;
    let (name, _code) = rest.rsplit_once(':')?;
    (!name.is_empty()).then_some(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        assert_eq!(factor("ROE_大于20"), "factor:ROE_大于20");
        assert_eq!(theme_detail("机器人", "000001"), "theme:detail:机器人:000001");
        assert_eq!(indicator_heat("龙头", "600519"), "zhibiao:龙头:600519");
        assert_eq!(code("600519"), "code:600519");
    }

    #[test]
    fn test_theme_name_of_detail() {
        assert_eq!(theme_name_of_detail("theme:detail:机器人:000001"), Some("机器人"));
        assert_eq!(theme_name_of_detail("theme:detail:AI:应用:000001"), Some("AI:应用"));
        assert_eq!(theme_name_of_detail("theme:detail::000001"), None);
        assert_eq!(theme_name_of_detail("theme:detail:orphan"), None);
        assert_eq!(theme_name_of_detail("theme:机器人"), None);
    }
}
