//! Command line front end: validates Nitro attestation documents and prints
//! the pieces downstream verifiers consume.

use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use nitro_attestation_validator::envelope::decode_base64;
use nitro_attestation_validator::root::{pem_from_root_archive, AWS_NITRO_ROOT_ARCHIVE_URL};
use nitro_attestation_validator::{
    inspect_attestation, unsafe_attestation_doc_from_der, validate_attestation,
    AttestationEnvelope, TrustedRoot, ValidationOptions,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "nitro-attestation-validator", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate a document and print the attested identity as JSON.
    Validate(ValidateArgs),
    /// Run every check and print a per-step report as JSON.
    Inspect(ValidateArgs),
    /// Print the leaf signing key as 0x-prefixed hex(x) || hex(y).
    PublicKey(InputArgs),
    /// Print the raw COSE_Sign1 fields as hex.
    RawFields(InputArgs),
    /// Print the certificate chain as hex DER, leaf first.
    Chain {
        #[command(flatten)]
        input: InputArgs,
        #[command(flatten)]
        root: RootArgs,
    },
    /// Print a human readable summary of the document.
    Show(InputArgs),
    /// Download the AWS root archive, check its hash, and write `root.pem`.
    FetchRoot {
        #[arg(long, env = "NITRO_ROOT_URL", default_value = AWS_NITRO_ROOT_ARCHIVE_URL)]
        url: String,
        #[arg(long, default_value = "root.pem")]
        out: PathBuf,
        #[arg(long, default_value_t = 30)]
        timeout_secs: u64,
    },
}

#[derive(Args, Debug)]
struct InputArgs {
    /// File holding the attestation. Reads stdin when omitted.
    #[arg(value_name = "FILE")]
    input: Option<PathBuf>,
    #[arg(long, value_enum, default_value_t = InputFormat::Auto)]
    format: InputFormat,
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum InputFormat {
    /// Guess from the content.
    Auto,
    /// `{"attestation": "<base64>"}`
    Json,
    Base64,
    /// COSE_Sign1 bytes.
    Raw,
}

#[derive(Args, Debug)]
struct RootArgs {
    /// PEM file holding the trusted root.
    #[arg(long, env = "NITRO_ROOT_PEM", conflicts_with_all = ["root_archive", "fetch_root"])]
    root_pem: Option<PathBuf>,
    /// The AWS root zip archive, checked against its pinned hash.
    #[arg(long, env = "NITRO_ROOT_ARCHIVE", conflicts_with = "fetch_root")]
    root_archive: Option<PathBuf>,
    /// Download the AWS root archive instead of using the embedded copy.
    #[arg(long)]
    fetch_root: bool,
    #[arg(long, env = "NITRO_ROOT_URL", default_value = AWS_NITRO_ROOT_ARCHIVE_URL)]
    root_url: String,
    #[arg(long, default_value_t = 30)]
    fetch_timeout_secs: u64,
}

#[derive(Args, Debug)]
struct ValidateArgs {
    #[command(flatten)]
    input: InputArgs,
    #[command(flatten)]
    root: RootArgs,
    /// Do not check certificate validity windows. Never use in production.
    #[arg(long, env = "NITRO_SKIP_EXPIRATION")]
    skip_expiration: bool,
    /// Validate as of this unix time in seconds instead of now.
    #[arg(long, value_name = "UNIX_SECS")]
    at: Option<u64>,
    /// Fail when PCR4 does not match the instance named in module_id.
    #[arg(long)]
    enforce_instance_binding: bool,
}

impl ValidateArgs {
    fn options(&self) -> ValidationOptions {
        let mut options = ValidationOptions::new();
        if self.skip_expiration {
            options = options.skip_expiration();
        }
        if let Some(secs) = self.at {
            options = options.with_time(UNIX_EPOCH + Duration::from_secs(secs));
        }
        if self.enforce_instance_binding {
            options = options.require_instance_binding();
        }
        options
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // Fail closed: nothing is printed on stdout for a rejected document.
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command) -> Result<()> {
    match command {
        Command::Validate(args) => {
            let raw = read_attestation(&args.input)?;
            let root = load_root(&args.root).await?;
            let signer = validate_attestation(&raw, &root, &args.options())
                .context("attestation rejected")?;
            println!("{}", serde_json::to_string_pretty(&signer)?);
        }
        Command::Inspect(args) => {
            let raw = read_attestation(&args.input)?;
            let root = load_root(&args.root).await?;
            let report = inspect_attestation(&raw, &root, &args.options())?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::PublicKey(input) => {
            let doc = unsafe_attestation_doc_from_der(&read_attestation(&input)?)?;
            println!("{}", doc.signing_key()?);
        }
        Command::RawFields(input) => {
            let doc = unsafe_attestation_doc_from_der(&read_attestation(&input)?)?;
            println!("{}", serde_json::to_string_pretty(&doc.raw_fields_hex())?);
        }
        Command::Chain { input, root } => {
            let doc = unsafe_attestation_doc_from_der(&read_attestation(&input)?)?;
            let root = load_root(&root).await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&doc.certificate_chain_hex(&root))?
            );
        }
        Command::Show(input) => {
            let doc = unsafe_attestation_doc_from_der(&read_attestation(&input)?)?;
            println!("{doc}");
        }
        Command::FetchRoot {
            url,
            out,
            timeout_secs,
        } => {
            let archive = fetch_archive(&url, Duration::from_secs(timeout_secs)).await?;
            let pem = pem_from_root_archive(&archive)?;
            let root = TrustedRoot::from_pem(&pem)?;
            std::fs::write(&out, &pem).with_context(|| format!("writing {}", out.display()))?;
            info!(
                fingerprint = %root.fingerprint(),
                path = %out.display(),
                "root certificate saved"
            );
        }
    }
    Ok(())
}

fn read_attestation(args: &InputArgs) -> Result<Vec<u8>> {
    let bytes = match &args.input {
        Some(path) => {
            std::fs::read(path).with_context(|| format!("reading {}", path.display()))?
        }
        None => {
            let mut buf = Vec::new();
            std::io::stdin()
                .read_to_end(&mut buf)
                .context("reading stdin")?;
            buf
        }
    };
    decode_input(bytes, args.format)
}

fn decode_input(bytes: Vec<u8>, format: InputFormat) -> Result<Vec<u8>> {
    let format = match format {
        InputFormat::Auto => detect_format(&bytes),
        other => other,
    };
    match format {
        InputFormat::Raw | InputFormat::Auto => Ok(bytes),
        InputFormat::Base64 => {
            let text = std::str::from_utf8(&bytes).context("base64 input is not UTF-8")?;
            Ok(decode_base64(text)?)
        }
        InputFormat::Json => {
            let text = std::str::from_utf8(&bytes).context("JSON input is not UTF-8")?;
            Ok(AttestationEnvelope::from_json(text)?.decode()?)
        }
    }
}

fn detect_format(bytes: &[u8]) -> InputFormat {
    // 0xD2 is tag 18, 0x84 an untagged 4 element array.
    match bytes.first() {
        Some(0xD2) | Some(0x84) => InputFormat::Raw,
        _ if bytes.trim_ascii_start().first() == Some(&b'{') => InputFormat::Json,
        _ => InputFormat::Base64,
    }
}

async fn load_root(args: &RootArgs) -> Result<TrustedRoot> {
    let root = if let Some(path) = &args.root_pem {
        let pem = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        TrustedRoot::from_pem(&pem)?
    } else if let Some(path) = &args.root_archive {
        let archive = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        TrustedRoot::from_archive(&archive)?
    } else if args.fetch_root {
        let archive =
            fetch_archive(&args.root_url, Duration::from_secs(args.fetch_timeout_secs)).await?;
        TrustedRoot::from_archive(&archive)?
    } else {
        TrustedRoot::aws_nitro()?
    };
    info!(fingerprint = %root.fingerprint(), "using trusted root");
    Ok(root)
}

async fn fetch_archive(url: &str, timeout: Duration) -> Result<Vec<u8>> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .context("building HTTP client")?;
    let started = SystemTime::now();
    let response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("fetching {url}"))?
        .error_for_status()?;
    let body = response.bytes().await.context("reading root archive")?;
    info!(
        bytes = body.len(),
        elapsed_ms = started.elapsed().map(|d| d.as_millis()).unwrap_or_default(),
        "downloaded root archive"
    );
    Ok(body.to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_input_formats() {
        assert_eq!(detect_format(&[0xd2, 0x84]), InputFormat::Raw);
        assert_eq!(detect_format(&[0x84, 0x44]), InputFormat::Raw);
        assert_eq!(detect_format(b"  {\"attestation\":\"\"}"), InputFormat::Json);
        assert_eq!(detect_format(b"hEShATgi"), InputFormat::Base64);
    }

    #[test]
    fn json_input_is_unwrapped() {
        let bytes = decode_input(br#"{"attestation":"0oRA"}"#.to_vec(), InputFormat::Auto).unwrap();
        assert_eq!(bytes, vec![0xd2, 0x84, 0x40]);
    }

    #[test]
    fn cli_flags_map_to_options() {
        let cli = Cli::parse_from([
            "nitro-attestation-validator",
            "validate",
            "doc.json",
            "--skip-expiration",
            "--at",
            "1721159587",
            "--enforce-instance-binding",
        ]);
        let Command::Validate(args) = cli.command else {
            panic!("expected validate");
        };
        let options = args.options();
        assert!(!options.check_expiration);
        assert!(options.enforce_instance_binding);
        assert_eq!(
            options.current_time,
            Some(UNIX_EPOCH + Duration::from_secs(1_721_159_587))
        );
    }
}
