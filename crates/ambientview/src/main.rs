mod cli;
mod fetch;
mod paths;
mod prefs;
mod run;

use anyhow::Result;
use cli::Command;
use paths::AppPaths;

fn main() -> Result<()> {
    let cli = cli::parse();
    run::initialise_tracing();
    let paths = AppPaths::discover()?;

    match cli.command {
        Some(Command::Config(config_cmd)) => prefs::handle_config_command(config_cmd.action, &paths),
        Some(Command::Enable) => prefs::set_enabled(&paths, true),
        Some(Command::Disable) => prefs::set_enabled(&paths, false),
        None => run::run(cli.run, &paths),
    }
}
