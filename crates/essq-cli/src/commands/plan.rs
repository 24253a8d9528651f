use crate::cli::PlanArgs;
use crate::commands::load_job_spec;
use crate::error::CliError;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets, Attribute, Cell, Color, Table};
use essq_core::config::Settings;
use essq_engine::planner;

pub fn handle_plan(args: PlanArgs, settings: &Settings) -> Result<(), CliError> {
    let spec = load_job_spec(&args.spec)?;
    spec.validate()?;
    let resolution = settings.job_defaults.rotor_scan_resolution;
    let plan = planner::plan(&spec, resolution);

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            Cell::new("Dimension")
                .add_attribute(Attribute::Bold)
                .fg(Color::Cyan),
            Cell::new("Work items")
                .add_attribute(Attribute::Bold)
                .fg(Color::Cyan),
            Cell::new("Tasks")
                .add_attribute(Attribute::Bold)
                .fg(Color::Cyan),
        ]);
    table.add_row(vec![
        Cell::new(plan.dimension.to_string()).fg(Color::Yellow),
        Cell::new(plan.count),
        Cell::new(plan.tasks.map_or_else(|| "-".to_string(), |t| t.to_string())),
    ]);
    println!("{}", table);

    if plan.is_array() {
        let settings = planner::ItemSettings::from_spec(&spec);
        let artifact = planner::build_artifact(&spec, &settings, &plan, resolution);
        for key in artifact.keys() {
            let items = artifact.get(key).map_or(0, <[_]>::len);
            println!("  {}: {} work item(s)", key, items);
        }
    }
    Ok(())
}
