use clap::{Args, Parser, Subcommand, ValueEnum, ValueHint};
use std::path::PathBuf;

use atmap::StateVocabulary;

/// Austrian administrative data-fusion pipeline
#[derive(Parser, Debug)]
#[command(name = "atmap", version, about, propagate_version = true)]
pub struct Cli {
    /// Increase output verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch every source, fuse them and write the dissolved layers
    Run(RunArgs),

    /// Print the postal-code workbook URL currently linked from the registry page
    ResolveLink(ResolveLinkArgs),

    /// Print the built-in configuration as JSON
    DefaultConfig,
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, ValueEnum)]
pub enum VocabularyArg { Full, WithoutCarinthia }

impl From<VocabularyArg> for StateVocabulary {
    fn from(arg: VocabularyArg) -> Self {
        match arg {
            VocabularyArg::Full => StateVocabulary::Full,
            VocabularyArg::WithoutCarinthia => StateVocabulary::WithoutCarinthia,
        }
    }
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// JSON configuration file (defaults to the built-in sources)
    #[arg(short, long, value_hint = ValueHint::FilePath)]
    pub config: Option<PathBuf>,

    /// Directory for downloaded archives
    #[arg(long, value_hint = ValueHint::DirPath)]
    pub work_dir: Option<PathBuf>,

    /// Output directory for the GeoJSON layers and the run report
    #[arg(short, long, value_hint = ValueHint::DirPath)]
    pub out: PathBuf,

    /// State vocabulary override
    #[arg(long, value_enum)]
    pub vocabulary: Option<VocabularyArg>,

    /// Drop geometry units that found no postal-code match
    #[arg(long)]
    pub drop_unmatched: bool,

    /// Fail on state abbreviations outside the vocabulary
    #[arg(long)]
    pub strict: bool,
}

#[derive(Args, Debug)]
pub struct ResolveLinkArgs {
    /// JSON configuration file (defaults to the built-in sources)
    #[arg(short, long, value_hint = ValueHint::FilePath)]
    pub config: Option<PathBuf>,
}
