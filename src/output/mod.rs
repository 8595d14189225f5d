pub mod json;
pub mod names;
pub mod table;
pub mod tsv;

use clap::ValueEnum;
use serde::Serialize;

use crate::app::AppSnapshot;
use crate::category::Category;
use crate::plugin::PluginEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    Tsv,
    Names,
}

impl ValueEnum for OutputFormat {
    fn value_variants<'a>() -> &'a [Self] {
        &[
            OutputFormat::Table,
            OutputFormat::Json,
            OutputFormat::Tsv,
            OutputFormat::Names,
        ]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        match self {
            OutputFormat::Table => Some(clap::builder::PossibleValue::new("table")),
            OutputFormat::Json => Some(clap::builder::PossibleValue::new("json")),
            OutputFormat::Tsv => Some(clap::builder::PossibleValue::new("tsv")),
            OutputFormat::Names => Some(clap::builder::PossibleValue::new("names")),
        }
    }
}

/// One row of the `plugins` listing.
#[derive(Debug, Clone, Serialize)]
pub struct PluginRow {
    pub name: String,
    pub priority: i32,
    pub enabled: bool,
    pub actions: Vec<String>,
}

impl PluginRow {
    pub fn from_entry(entry: &PluginEntry) -> Self {
        Self {
            name: entry.name().to_string(),
            priority: entry.priority(),
            enabled: entry.is_enabled(),
            actions: entry
                .info()
                .actions
                .iter()
                .map(|a| a.as_str().to_string())
                .collect(),
        }
    }
}

pub struct Formatter {
    format: OutputFormat,
    no_color: bool,
}

impl Formatter {
    pub fn new(format: OutputFormat, no_color: bool) -> Self {
        Self { format, no_color }
    }

    pub fn format_apps(
        &self,
        apps: &[AppSnapshot],
        w: &mut dyn std::io::Write,
    ) -> anyhow::Result<()> {
        match self.format {
            OutputFormat::Table => table::format_table(apps, w, self.no_color),
            OutputFormat::Json => json::format_json(apps, w),
            OutputFormat::Tsv => tsv::format_tsv(apps, w),
            OutputFormat::Names => names::format_names(apps, w),
        }
    }

    /// Detailed view of a single record.
    pub fn format_app(&self, app: &AppSnapshot, w: &mut dyn std::io::Write) -> anyhow::Result<()> {
        match self.format {
            OutputFormat::Json => json::format_json(app, w),
            OutputFormat::Names => names::format_names(std::slice::from_ref(app), w),
            _ => {
                let or_dash = |v: &Option<String>| v.clone().unwrap_or_else(|| "-".to_string());
                writeln!(w, "Id:          {}", or_dash(&app.id))?;
                writeln!(w, "Name:        {}", or_dash(&app.name))?;
                writeln!(w, "Summary:     {}", or_dash(&app.summary))?;
                writeln!(w, "Version:     {}", or_dash(&app.version))?;
                writeln!(w, "State:       {}", app.state)?;
                writeln!(w, "Kind:        {}", app.kind)?;
                writeln!(w, "Managed by:  {}", or_dash(&app.management_plugin))?;
                writeln!(w, "Icon:        {}", or_dash(&app.icon))?;
                writeln!(
                    w,
                    "Categories:  {}",
                    if app.categories.is_empty() {
                        "-".to_string()
                    } else {
                        app.categories.join(", ")
                    }
                )?;
                let quirks = app.quirks.names();
                writeln!(
                    w,
                    "Quirks:      {}",
                    if quirks.is_empty() {
                        "-".to_string()
                    } else {
                        quirks.join(", ")
                    }
                )?;
                Ok(())
            }
        }
    }

    pub fn format_categories(
        &self,
        categories: &[Category],
        w: &mut dyn std::io::Write,
    ) -> anyhow::Result<()> {
        match self.format {
            OutputFormat::Json => json::format_json(categories, w),
            OutputFormat::Tsv => {
                writeln!(w, "id\tname\tsize")?;
                for category in categories {
                    writeln!(w, "{}\t{}\t{}", category.id, category.name, category.size)?;
                }
                Ok(())
            }
            OutputFormat::Names => {
                for category in categories {
                    writeln!(w, "{}", category.id)?;
                }
                Ok(())
            }
            OutputFormat::Table => table::format_categories(categories, w),
        }
    }

    pub fn format_plugins(
        &self,
        plugins: &[PluginRow],
        w: &mut dyn std::io::Write,
    ) -> anyhow::Result<()> {
        match self.format {
            OutputFormat::Json => json::format_json(plugins, w),
            OutputFormat::Names => {
                for plugin in plugins {
                    writeln!(w, "{}", plugin.name)?;
                }
                Ok(())
            }
            OutputFormat::Tsv => {
                writeln!(w, "name\tpriority\tenabled\tactions")?;
                for plugin in plugins {
                    writeln!(
                        w,
                        "{}\t{}\t{}\t{}",
                        plugin.name,
                        plugin.priority,
                        plugin.enabled,
                        plugin.actions.join(",")
                    )?;
                }
                Ok(())
            }
            OutputFormat::Table => table::format_plugins(plugins, w, self.no_color),
        }
    }
}
