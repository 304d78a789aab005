use clap::Parser;
use serverdemon::cli::Cli;
use serverdemon::paths::Paths;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    let paths = Paths::new(cli.include)?;

    if cli.check {
        let servers = serverdemon::daemon::load(&paths)?;
        for server in &servers {
            println!("{}\tport {}\t{}", server.name, server.port, server.executable_path);
        }
        return Ok(());
    }

    serverdemon::daemon::run(paths).await
}
