use serde::Serialize;

pub fn format_json<T: Serialize + ?Sized>(
    value: &T,
    w: &mut dyn std::io::Write,
) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    writeln!(w, "{}", json)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::AppSnapshot;
    use crate::output::tests::make_app;

    #[test]
    fn test_json_list_empty() {
        let apps: Vec<AppSnapshot> = vec![];
        let mut buf = Vec::new();
        format_json(&apps, &mut buf).unwrap();
        let parsed: serde_json::Value =
            serde_json::from_str(String::from_utf8(buf).unwrap().trim()).unwrap();
        assert!(parsed.is_array());
        assert_eq!(parsed.as_array().unwrap().len(), 0);
    }

    #[test]
    fn test_json_list_fields() {
        let apps = vec![make_app("Firefox"), make_app("GIMP")];
        let mut buf = Vec::new();
        format_json(&apps, &mut buf).unwrap();
        let parsed: serde_json::Value =
            serde_json::from_str(String::from_utf8(buf).unwrap().trim()).unwrap();
        assert_eq!(parsed.as_array().unwrap().len(), 2);
        let app = &parsed[0];
        assert_eq!(app["name"], "Firefox");
        assert_eq!(app["id"], "system/desktop/firefox/*/*");
        assert_eq!(app["kind"], "desktop");
        assert_eq!(app["categories"][0], "Utility");
        assert!(app.get("management_plugin").is_some());
    }
}
