// crates/idempotency-cli/src/main.rs
// ============================================================================
// Module: Idempotency CLI Entry Point
// Description: Housekeeping commands for the idempotency claim store.
// Purpose: Validate config, sweep expired records, and inspect claims.
// Dependencies: clap, idempotency-config, idempotency-core, serde_json, thiserror
// ============================================================================

//! ## Overview
//! The `idempotency` binary wraps the configured claim store for operators:
//! config validation, expiry sweeps, record inspection, and text hashing.
//! Inspection never prints claim nonces. Security posture: inputs are
//! untrusted and must be validated.

// ============================================================================
// SECTION: Modules
// ============================================================================


// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::ArgGroup;
use clap::Args;
use clap::Parser;
use clap::Subcommand;
use idempotency_config::IdempotencyConfig;
use idempotency_core::ClaimKey;
use idempotency_core::ClaimStore;
use idempotency_core::IdempotencyCoordinator;
use idempotency_core::IdempotencyRecord;
use idempotency_core::InputValue;
use idempotency_core::KeyDeriver;
use idempotency_core::KeyHash;
use idempotency_core::KeyInputs;
use idempotency_core::ScopeId;
use idempotency_core::SharedClaimStore;
use idempotency_core::TenantId;
use idempotency_core::canonical_json_bytes;
use idempotency_core::hash_text;
use serde_json::Value;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Placeholder written in place of the claim nonce.
const REDACTED: &str = "<redacted>";

// ============================================================================
// SECTION: CLI Types
// ============================================================================

/// Top-level CLI definition.
#[derive(Parser, Debug)]
#[command(name = "idempotency", version, disable_help_subcommand = true)]
struct Cli {
    /// Selected subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand, Debug)]
enum Commands {
    /// Configuration utilities.
    Config {
        /// Selected config subcommand.
        #[command(subcommand)]
        command: ConfigCommand,
    },
    /// Delete expired records from the configured store.
    Sweep(SweepCommand),
    /// Print a stored record with its claim nonce redacted.
    Inspect(InspectCommand),
    /// Print the SHA-256 digest of whitespace-normalized text.
    HashText(HashTextCommand),
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
enum ConfigCommand {
    /// Load and validate configuration, including the MAC secret.
    Validate(ConfigArgs),
}

/// Shared config path argument.
#[derive(Args, Debug, Default)]
struct ConfigArgs {
    /// Config file path (defaults to `IDEMPOTENCY_CONFIG` or `idempotency.toml`).
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

/// Arguments for `sweep`.
#[derive(Args, Debug)]
struct SweepCommand {
    /// Config selection.
    #[command(flatten)]
    config: ConfigArgs,
}

/// Arguments for `inspect`.
#[derive(Args, Debug)]
#[command(group(ArgGroup::new("identity").required(true).args(["key_hash", "input"])))]
struct InspectCommand {
    /// Tenant identifier.
    #[arg(long)]
    tenant: String,
    /// Operation scope.
    #[arg(long)]
    scope: String,
    /// Precomputed key hash (64 lowercase hex characters).
    #[arg(long, value_name = "HEX")]
    key_hash: Option<String>,
    /// Key input as `name=value`; repeat for each input.
    #[arg(long = "input", value_name = "NAME=VALUE")]
    input: Vec<String>,
    /// Config selection.
    #[command(flatten)]
    config: ConfigArgs,
}

/// Arguments for `hash-text`.
#[derive(Args, Debug)]
struct HashTextCommand {
    /// Text to hash.
    text: String,
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// CLI error wrapper for user-facing messages.
#[derive(Debug, Error)]
#[error("{message}")]
struct CliError {
    /// Human-readable error message.
    message: String,
}

impl CliError {
    /// Constructs a new [`CliError`].
    const fn new(message: String) -> Self {
        Self {
            message,
        }
    }
}

/// CLI result alias for fallible operations.
type CliResult<T> = Result<T, CliError>;

// ============================================================================
// SECTION: Entry Point
// ============================================================================

/// CLI entry point returning an exit code.
fn main() -> ExitCode {
    match run() {
        Ok(code) => code,
        Err(err) => emit_error(&err.to_string()),
    }
}

/// Executes the CLI command dispatcher.
fn run() -> CliResult<ExitCode> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Config {
            command: ConfigCommand::Validate(args),
        } => command_config_validate(&args),
        Commands::Sweep(command) => command_sweep(&command),
        Commands::Inspect(command) => command_inspect(&command),
        Commands::HashText(command) => {
            write_stdout(&hash_text(&command.text))?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

// ============================================================================
// SECTION: Commands
// ============================================================================

/// Validates configuration and the configured secret.
fn command_config_validate(args: &ConfigArgs) -> CliResult<ExitCode> {
    let config = load_config(args)?;
    config.resolve_secret().map_err(error_message)?;
    write_stdout("config ok")?;
    Ok(ExitCode::SUCCESS)
}

/// Deletes expired records and prints the count.
fn command_sweep(command: &SweepCommand) -> CliResult<ExitCode> {
    let coordinator = build_coordinator(&load_config(&command.config)?)?;
    let deleted = coordinator.sweep_expired().map_err(|err| CliError::new(err.to_string()))?;
    write_stdout(&serde_json::json!({ "deleted": deleted }).to_string())?;
    Ok(ExitCode::SUCCESS)
}

/// Prints one record, or `null` when none exists.
fn command_inspect(command: &InspectCommand) -> CliResult<ExitCode> {
    let coordinator = build_coordinator(&load_config(&command.config)?)?;
    let tenant = TenantId::new(command.tenant.as_str()).map_err(error_message)?;
    let scope = ScopeId::new(command.scope.as_str()).map_err(error_message)?;
    let key = match &command.key_hash {
        Some(hash) => {
            ClaimKey::new(tenant, scope, KeyHash::parse(hash.as_str()).map_err(error_message)?)
        }
        None => {
            let inputs = parse_inputs(&command.input)?;
            coordinator.derive_key(&tenant, &scope, &inputs).map_err(error_message)?
        }
    };
    let record = coordinator.store().read_by_key(&key).map_err(error_message)?;
    write_stdout(&render_record(record.as_ref())?)?;
    Ok(ExitCode::SUCCESS)
}

// ============================================================================
// SECTION: Wiring
// ============================================================================

/// Loads configuration from the selected path.
fn load_config(args: &ConfigArgs) -> CliResult<IdempotencyConfig> {
    IdempotencyConfig::load(args.config.as_deref()).map_err(error_message)
}

/// Builds a coordinator over the configured store, secret, and audit sink.
fn build_coordinator(
    config: &IdempotencyConfig,
) -> CliResult<IdempotencyCoordinator<SharedClaimStore>> {
    let secret = config.resolve_secret().map_err(error_message)?;
    let store = config.open_store().map_err(error_message)?;
    let audit = config.audit_sink().map_err(error_message)?;
    Ok(IdempotencyCoordinator::new(store, KeyDeriver::new(secret))
        .with_audit_sink(audit))
}

// ============================================================================
// SECTION: Input Parsing
// ============================================================================

/// Parses repeated `name=value` arguments into key inputs.
fn parse_inputs(raw: &[String]) -> CliResult<KeyInputs> {
    let mut inputs = KeyInputs::new();
    for entry in raw {
        let (name, value) = entry.split_once('=').ok_or_else(|| {
            CliError::new(format!("input must be NAME=VALUE: {entry}"))
        })?;
        inputs.insert(name, parse_input_value(value)).map_err(error_message)?;
    }
    Ok(inputs)
}

/// Parses a value as a JSON scalar, falling back to plain text.
fn parse_input_value(raw: &str) -> InputValue {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Null) => InputValue::Null,
        Ok(Value::Bool(value)) => InputValue::Bool(value),
        Ok(Value::String(value)) => InputValue::Text(value),
        Ok(Value::Number(number)) => {
            number.as_i64().map_or_else(|| InputValue::Text(raw.to_string()), InputValue::Integer)
        }
        Ok(Value::Array(_) | Value::Object(_)) | Err(_) => InputValue::Text(raw.to_string()),
    }
}

// ============================================================================
// SECTION: Output
// ============================================================================

/// Renders a record as canonical JSON with the nonce redacted.
fn render_record(record: Option<&IdempotencyRecord>) -> CliResult<String> {
    let Some(record) = record else {
        return Ok("null".to_string());
    };
    let mut value = serde_json::to_value(record).map_err(error_message)?;
    if let Some(fields) = value.as_object_mut() {
        fields.insert("claim_nonce".to_string(), Value::from(REDACTED));
    }
    let bytes = canonical_json_bytes(&value).map_err(error_message)?;
    String::from_utf8(bytes).map_err(error_message)
}

/// Writes a single line to stdout.
fn write_stdout(message: &str) -> CliResult<()> {
    let mut stdout = std::io::stdout();
    writeln!(&mut stdout, "{message}")
        .map_err(|err| CliError::new(format!("failed to write to stdout: {err}")))
}

/// Writes a single line to stderr.
fn write_stderr_line(message: &str) -> std::io::Result<()> {
    let mut stderr = std::io::stderr();
    writeln!(&mut stderr, "{message}")
}

/// Converts any displayable error into a [`CliError`].
fn error_message(err: impl std::fmt::Display) -> CliError {
    CliError::new(err.to_string())
}

/// Emits an error message to stderr and returns a failure exit code.
fn emit_error(message: &str) -> ExitCode {
    let _ = write_stderr_line(message);
    ExitCode::FAILURE
}
