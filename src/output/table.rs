use comfy_table::{Cell, ContentArrangement, Table};
use owo_colors::OwoColorize;

use crate::app::{AppSnapshot, AppState};
use crate::category::Category;
use crate::output::PluginRow;

fn colored_state(state: AppState, no_color: bool) -> String {
    let text = state.to_string();
    if no_color {
        return text;
    }
    match state {
        AppState::Installed => text.green().to_string(),
        AppState::Updatable | AppState::UpdatableLive => text.yellow().to_string(),
        AppState::Available | AppState::AvailableLocal => text.blue().to_string(),
        AppState::Installing | AppState::Removing | AppState::QueuedForInstall => {
            text.cyan().to_string()
        }
        AppState::Unavailable => text.red().to_string(),
        AppState::Unknown => text.dimmed().to_string(),
    }
}

pub fn format_table(
    apps: &[AppSnapshot],
    w: &mut dyn std::io::Write,
    no_color: bool,
) -> anyhow::Result<()> {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Name", "Id", "State", "Plugin", "Summary"]);

    for app in apps {
        table.add_row(vec![
            Cell::new(app.name.as_deref().unwrap_or("")),
            Cell::new(app.id.as_deref().unwrap_or("")),
            Cell::new(colored_state(app.state, no_color)),
            Cell::new(app.management_plugin.as_deref().unwrap_or("")),
            Cell::new(app.summary.as_deref().unwrap_or("")),
        ]);
    }

    writeln!(w, "{}", table)?;
    Ok(())
}

pub fn format_categories(categories: &[Category], w: &mut dyn std::io::Write) -> anyhow::Result<()> {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Category", "Apps"]);

    fn add_rows(table: &mut Table, categories: &[Category], depth: usize) {
        for category in categories {
            table.add_row(vec![
                Cell::new(format!("{}{}", "  ".repeat(depth), category.name)),
                Cell::new(category.size),
            ]);
            add_rows(table, &category.children, depth + 1);
        }
    }
    add_rows(&mut table, categories, 0);

    writeln!(w, "{}", table)?;
    Ok(())
}

pub fn format_plugins(
    plugins: &[PluginRow],
    w: &mut dyn std::io::Write,
    no_color: bool,
) -> anyhow::Result<()> {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Plugin", "Priority", "Enabled", "Actions"]);

    for plugin in plugins {
        let enabled = match (plugin.enabled, no_color) {
            (true, true) => "yes".to_string(),
            (false, true) => "no".to_string(),
            (true, false) => "yes".green().to_string(),
            (false, false) => "no".red().to_string(),
        };
        table.add_row(vec![
            Cell::new(&plugin.name),
            Cell::new(plugin.priority),
            Cell::new(enabled),
            Cell::new(plugin.actions.join(", ")),
        ]);
    }

    writeln!(w, "{}", table)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::tests::make_app;

    #[test]
    fn test_table_empty() {
        let mut buf = Vec::new();
        format_table(&[], &mut buf, true).unwrap();
        let output = String::from_utf8(buf).unwrap();
        // Should still have header
        assert!(output.contains("Name"));
        assert!(output.contains("State"));
    }

    #[test]
    fn test_table_no_color() {
        let apps = vec![make_app("Firefox")];
        let mut buf = Vec::new();
        format_table(&apps, &mut buf, true).unwrap();
        let output = String::from_utf8(buf).unwrap();
        assert!(output.contains("Firefox"));
        assert!(output.contains("installed"));
        assert!(!output.contains("\x1b["));
    }

    #[test]
    fn test_table_with_color() {
        let apps = vec![make_app("Firefox")];
        let mut buf = Vec::new();
        format_table(&apps, &mut buf, false).unwrap();
        let output = String::from_utf8(buf).unwrap();
        assert!(output.contains("Firefox"));
    }

    #[test]
    fn test_categories_indent_children() {
        let categories = vec![Category::new("Audio", "Audio")
            .with_size(2)
            .with_child(Category::new("Player", "Player").with_size(1))];
        let mut buf = Vec::new();
        format_categories(&categories, &mut buf).unwrap();
        let output = String::from_utf8(buf).unwrap();
        assert!(output.contains("Audio"));
        assert!(output.contains("  Player"));
    }

    #[test]
    fn test_plugins_table() {
        let plugins = vec![PluginRow {
            name: "flatpak".to_string(),
            priority: 10,
            enabled: false,
            actions: vec!["search".to_string()],
        }];
        let mut buf = Vec::new();
        format_plugins(&plugins, &mut buf, true).unwrap();
        let output = String::from_utf8(buf).unwrap();
        assert!(output.contains("flatpak"));
        assert!(output.contains("no"));
    }
}
