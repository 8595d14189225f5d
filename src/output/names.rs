use crate::app::AppSnapshot;

/// One name per line; records without a name fall back to their id.
pub fn format_names(apps: &[AppSnapshot], w: &mut dyn std::io::Write) -> anyhow::Result<()> {
    for app in apps {
        let label = app.name.as_deref().or(app.id.as_deref()).unwrap_or("");
        writeln!(w, "{}", label)?;
    }
    Ok(())
}
