use crate::cli::{Cli, CompletionsArgs};
use clap::CommandFactory;
use clap_complete::generate;

pub fn handle_completions(args: CompletionsArgs) {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    generate(args.shell, &mut cmd, name, &mut std::io::stdout());
}
