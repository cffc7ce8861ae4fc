use std::path::PathBuf;
use structopt::StructOpt;

/// Options for the CLI.
#[derive(StructOpt, Debug)]
#[structopt(name = "caserun", about = "Polymorphic test-case execution.")]
pub struct Opts {
    /// Directory containing caserun.toml.
    #[structopt(name = "TEST_DIR", parse(from_os_str))]
    pub dir: PathBuf,

    /// Include cases whose `<id>:<name>` matches this regex.
    #[structopt(short = "i", long = "include")]
    pub include_filter: Option<String>,

    /// Exclude cases whose `<id>:<name>` matches this regex.
    #[structopt(short = "e", long = "exclude")]
    pub exclude_filter: Option<String>,

    /// Run cases in concurrent waves. Overrides the configuration.
    #[structopt(short, long)]
    pub parallel: bool,

    /// Number of cases per wave.
    #[structopt(short, long)]
    pub max_concurrency: Option<usize>,

    /// Number of worker threads. Defaults to the number of CPUs.
    #[structopt(short, long = "jobs")]
    pub jobs_limit: Option<usize>,

    /// Print the cases that would run without running them.
    #[structopt(short = "n", long)]
    pub dry_run: bool,

    /// Print the results as JSON instead of a summary.
    #[structopt(long)]
    pub json: bool,

    /// Show which runners are available and exit.
    #[structopt(long)]
    pub runners: bool,

    /// Print the logs of cases that did not pass.
    #[structopt(short, long)]
    pub verbose: bool,
}
