use crate::app::AppSnapshot;

pub fn format_tsv(apps: &[AppSnapshot], w: &mut dyn std::io::Write) -> anyhow::Result<()> {
    writeln!(w, "id\tname\tstate\tplugin\tsummary")?;
    for app in apps {
        writeln!(
            w,
            "{}\t{}\t{}\t{}\t{}",
            app.id.as_deref().unwrap_or(""),
            app.name.as_deref().unwrap_or(""),
            app.state,
            app.management_plugin.as_deref().unwrap_or(""),
            app.summary.as_deref().unwrap_or("")
        )?;
    }
    Ok(())
}
