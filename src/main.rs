use caserun::{
    case::TestCaseConfig,
    cli, errors,
    executor::{registry, ExecutionResult, Status},
    picker::toml::Config,
    printer, telemetry,
};

use cli::Opts;
use errors::ExecError;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use structopt::StructOpt;
use tokio::runtime;

fn dry_run(cases: &[TestCaseConfig]) {
    use colored::*;
    for case in cases {
        println!(
            "{}{}{}\n  {}",
            case.id.to_string().blue(),
            ":".blue(),
            case.name.blue(),
            case.kind
        );
    }
}

fn filter_regex(flag: &str, pattern: Option<&String>) -> Result<Option<Regex>, ExecError> {
    pattern
        .map(|reg| {
            Regex::new(reg).map_err(|err| ExecError::Config(format!("Invalid {} regex: {}", flag, err)))
        })
        .transpose()
}

fn run() -> Result<i32, ExecError> {
    let opts = Opts::from_args();
    telemetry::init_tracing(if opts.verbose { "info" } else { "warn" });
    let conf = Config::from_path(&opts.dir)?;

    // Get the include and exclude regexes.
    let include = filter_regex("--include", opts.include_filter.as_ref())?;
    let exclude = filter_regex("--exclude", opts.exclude_filter.as_ref())?;

    // Switch to directory containing caserun.toml.
    std::env::set_current_dir(&opts.dir)?;

    let cases: Vec<TestCaseConfig> = conf
        .cases()?
        .into_iter()
        .filter(|case| {
            let label = format!("{}:{}", case.id, case.name);
            include.as_ref().map_or(true, |re| re.is_match(&label))
                && exclude.as_ref().map_or(true, |re| !re.is_match(&label))
        })
        .collect();

    // Print out the selected cases in dry run mode.
    if opts.dry_run {
        dry_run(&cases);
        return Ok(0);
    }

    let mut options = conf.batch_options();
    options.parallel |= opts.parallel;
    if let Some(max) = opts.max_concurrency {
        options.max_concurrency = max;
    }

    let runtime = runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(opts.jobs_limit.unwrap_or_else(num_cpus::get))
        .build()?;

    let registry = registry::init(conf.registry_settings());

    if opts.runners {
        let infos = runtime.block_on(registry.available_runners());
        if opts.json {
            println!("{}", serde_json::to_string_pretty(&infos)?);
        } else {
            println!("{}", printer::runners_str(&infos));
        }
        return Ok(0);
    }

    let by_id: HashMap<_, _> = cases.iter().map(|case| (case.id, case)).collect();
    let mut progress = |done: usize, total: usize, result: &ExecutionResult| {
        tracing::info!(done, total, status = result.status.as_str(), "case finished");
    };
    let results =
        runtime.block_on(registry.execute_batch(cases.clone(), options, Some(&mut progress)));

    let mut ordered: Vec<_> = results.iter().collect();
    ordered.sort_by_key(|(id, _)| **id);

    if opts.json {
        let map: BTreeMap<_, _> = ordered.iter().map(|(id, r)| (**id, *r)).collect();
        println!("{}", serde_json::to_string_pretty(&map)?);
    } else {
        for (id, result) in &ordered {
            if let Some(case) = by_id.get(id) {
                println!("{}", printer::report_str(case, result, opts.verbose));
            }
        }
        let all: Vec<&ExecutionResult> = ordered.iter().map(|(_, r)| *r).collect();
        println!("{}", printer::summary_str(&all));
    }

    Ok(ordered
        .iter()
        .filter(|(_, result)| result.status != Status::Passed)
        .count() as i32)
}

fn main() {
    std::process::exit(match run() {
        Err(err) => {
            println!("error: {}", err);
            1
        }
        Ok(failed_cases) => failed_cases,
    })
}
