use crate::cli::ListArgs;
use crate::error::CliError;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets, Attribute, Cell, Color, Table};
use essq_client::{CompletedEntry, Registry, RegistryEntry};
use essq_core::config::Settings;

fn header(titles: &[&str]) -> Vec<Cell> {
    titles
        .iter()
        .map(|h| Cell::new(h).add_attribute(Attribute::Bold).fg(Color::Cyan))
        .collect()
}

fn entry_cells(entry: &RegistryEntry) -> Vec<Cell> {
    vec![
        Cell::new(entry.job_num.value()),
        Cell::new(&entry.job_name).fg(Color::Yellow),
        Cell::new(&entry.label),
        Cell::new(&entry.job_type),
        Cell::new(&entry.level),
        Cell::new(&entry.host),
        Cell::new(entry.job_id.as_deref().unwrap_or("-")),
        Cell::new(format!("{:.1}", entry.memory_gb)),
    ]
}

fn completed_cells(completed: &CompletedEntry) -> Vec<Cell> {
    let mut cells = entry_cells(&completed.entry);
    let status_color = if completed.ess_status == essq_core::model::EssState::Done {
        Color::Green
    } else {
        Color::Red
    };
    cells.push(Cell::new(completed.ess_status).fg(status_color));
    cells.push(Cell::new(
        completed
            .run_time_secs
            .map_or_else(|| "-".to_string(), |secs| format!("{}s", secs)),
    ));
    cells
}

const COLUMNS: [&str; 8] = ["#", "Name", "Label", "Type", "Level", "Host", "Job ID", "Memory (GB)"];

pub fn handle_list(args: ListArgs, settings: &Settings) -> Result<(), CliError> {
    let registry = Registry::open(&settings.registry_dir()?)?;
    let wanted = |entry: &RegistryEntry| {
        args.project
            .as_deref()
            .map_or(true, |project| entry.project == project)
    };

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS);
    let mut rows = 0;
    if args.completed {
        let mut titles = COLUMNS.to_vec();
        titles.extend(["Status", "Run time"]);
        table.set_header(header(&titles));
        for completed in registry.completed()?.iter().filter(|c| wanted(&c.entry)) {
            table.add_row(completed_cells(completed));
            rows += 1;
        }
    } else {
        table.set_header(header(&COLUMNS));
        for entry in registry.initiated()?.iter().filter(|e| wanted(e)) {
            table.add_row(entry_cells(entry));
            rows += 1;
        }
    }

    if rows == 0 {
        println!("No jobs found in {}", registry.dir().display());
    } else {
        println!("{}", table);
    }
    Ok(())
}
