//! Caserun is a concurrent executor for API test cases of several kinds.
//!
//! A test case is a JSON object with an `id`, a `name`, a `type` and a
//! type-specific `config`. The `type` selects the runner that executes it:
//!   - `direct-http`: sends one HTTP request and evaluates assertions
//!     (status, JSONPath, header, body substring, response time) against the
//!     response.
//!   - `collection`: hands a collection export to `newman` and reads back its
//!     JSON report.
//!   - `script`: runs a test script with `pytest` and reads back its JSON
//!     report.
//!
//! Every run yields an execution result; a runner never fails the batch.
//!
//! ## Configuration
//! A caserun directory is described by a `caserun.toml` file:
//! ```toml
//! ver = "0.1.0"
//! # Case files can be globs or exact. A file holds one case or an array.
//! paths = [ "cases/*.json" ]
//! # (Optional) Run cases in concurrent waves.
//! parallel = true
//! # (Optional) Size of a wave. Defaults to 5.
//! max_concurrency = 4
//!
//! # (Optional) Default environment shared by every runner.
//! [environment]
//! base_url = "http://localhost:3000"
//! variables = { token = "abc" }
//!
//! # (Optional) Collection runner settings.
//! [collection]
//! binary = "newman"
//! timeout_ms = 600000
//!
//! # (Optional) Script runner settings.
//! [script]
//! binary = "pytest"
//! timeout_ms = 300000
//! ```
//!
//! Inside a case, `{{name}}` and `${name}` are replaced by the environment
//! variable `name`. A case's own `environment` is merged over the default
//! one key by key.
//!
//! ## Running
//! From anywhere, run `caserun <dir>`. Caserun prints one line per case
//! followed by a summary:
//! ```text
//! ✓ 1:health (12ms)
//! ✗ 2:create user (40ms)
//!     Some assertions failed
//!   1 passing / 1 failing / 0 errored
//! ```
//! The `--include` and `--exclude` regexes are matched against `<id>:<name>`.
//! `--json` prints the results keyed by case id instead. `--runners` reports
//! which runners have their tools installed.
pub mod case;
pub mod cli;
pub mod errors;
pub mod executor;
pub mod picker;
pub mod printer;
pub mod telemetry;
