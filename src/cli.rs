use crate::paths::INCLUDE_ENV_VAR;
use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(
    name = "serverdemon",
    about = "Wakes dormant game servers on the first connection",
    version
)]
pub struct Cli {
    /// Include file listing one server config path per line
    #[arg(long, env = INCLUDE_ENV_VAR)]
    pub include: Option<PathBuf>,

    /// Validate every server config and exit
    #[arg(long)]
    pub check: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_args() {
        let cli = Cli::try_parse_from(["serverdemon"]).unwrap();
        assert!(!cli.check);
    }

    #[test]
    fn test_include_flag() {
        let cli = Cli::try_parse_from(["serverdemon", "--include", "/srv/include"]).unwrap();
        assert_eq!(cli.include, Some(PathBuf::from("/srv/include")));
    }

    #[test]
    fn test_check_flag() {
        let cli = Cli::try_parse_from(["serverdemon", "--check"]).unwrap();
        assert!(cli.check);
    }

    #[test]
    fn test_unknown_flag_rejected() {
        assert!(Cli::try_parse_from(["serverdemon", "--daemon"]).is_err());
    }
}
