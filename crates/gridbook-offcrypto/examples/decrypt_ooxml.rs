//! Decrypt an OOXML `EncryptedPackage` container (password-protected `.xlsx` / `.xlsm` / `.xlsb`).
//!
//! ## Usage
//!
//! ```bash
//! # Decrypt to a file
//! cargo run -p gridbook-offcrypto --example decrypt_ooxml -- \
//!   --input book.xlsx --password 'correct horse battery staple' --output book.zip
//!
//! # Decrypt to stdout (useful for piping)
//! cargo run -p gridbook-offcrypto --example decrypt_ooxml -- \
//!   --input book.xlsx --password 'pw' > book.zip
//!
//! # (Agile) verify the dataIntegrity HMAC as well
//! cargo run -p gridbook-offcrypto --example decrypt_ooxml -- \
//!   --input book.xlsx --password 'pw' --verify-integrity > book.zip
//! ```
//!
//! The output is a ZIP file; inspect it with `unzip -l book.zip`.

use std::ffi::OsString;
use std::io::Write;
use std::path::PathBuf;

use gridbook_offcrypto::{decrypt_with_options, DecryptOptions};

fn main() {
    let args = match Args::parse() {
        Ok(args) => args,
        Err(ParseOutcome::Help(msg)) => {
            print!("{msg}");
            return;
        }
        Err(ParseOutcome::Error(msg)) => {
            eprintln!("{msg}");
            std::process::exit(2);
        }
    };

    let bytes = match std::fs::read(&args.input) {
        Ok(b) => b,
        Err(err) => {
            eprintln!("error: failed to read {}: {err}", args.input.display());
            std::process::exit(1);
        }
    };

    let options = DecryptOptions {
        verify_integrity: args.verify_integrity,
        verify_standard_password: args.verify_password,
        ..DecryptOptions::default()
    };

    let decrypted_zip = match decrypt_with_options(&bytes, &args.password, options) {
        Ok(b) => b,
        Err(err) => {
            eprintln!("error: failed to decrypt {}: {err}", args.input.display());
            std::process::exit(1);
        }
    };

    if let Some(out_path) = &args.output {
        if let Err(err) = std::fs::write(out_path, &decrypted_zip) {
            eprintln!("error: failed to write {}: {err}", out_path.display());
            std::process::exit(1);
        }
    } else {
        let mut stdout = std::io::stdout().lock();
        if let Err(err) = stdout.write_all(&decrypted_zip) {
            eprintln!("error: failed to write decrypted bytes to stdout: {err}");
            std::process::exit(1);
        }
    }
}

struct Args {
    input: PathBuf,
    password: String,
    verify_integrity: bool,
    verify_password: bool,
    output: Option<PathBuf>,
}

enum ParseOutcome {
    Help(String),
    Error(String),
}

impl Args {
    fn parse() -> Result<Self, ParseOutcome> {
        let mut input: Option<PathBuf> = None;
        let mut password: Option<String> = None;
        let mut verify_integrity = false;
        let mut verify_password = false;
        let mut output: Option<PathBuf> = None;

        let mut argv = std::env::args_os();
        let exe = argv
            .next()
            .unwrap_or_else(|| OsString::from("decrypt_ooxml"));

        while let Some(arg) = argv.next() {
            match arg.to_string_lossy().as_ref() {
                "-h" | "--help" => {
                    return Err(ParseOutcome::Help(Self::help(&exe)));
                }
                "--input" => {
                    let Some(v) = argv.next() else {
                        return Err(ParseOutcome::Error(format!(
                            "error: --input requires a value\n\n{}",
                            Self::help(&exe)
                        )));
                    };
                    input = Some(PathBuf::from(v));
                }
                "--password" => {
                    let Some(v) = argv.next() else {
                        return Err(ParseOutcome::Error(format!(
                            "error: --password requires a value\n\n{}",
                            Self::help(&exe)
                        )));
                    };
                    password = Some(v.to_string_lossy().to_string());
                }
                "--verify-integrity" => verify_integrity = true,
                "--verify-password" => verify_password = true,
                "--output" => {
                    let Some(v) = argv.next() else {
                        return Err(ParseOutcome::Error(format!(
                            "error: --output requires a value\n\n{}",
                            Self::help(&exe)
                        )));
                    };
                    output = Some(PathBuf::from(v));
                }
                other => {
                    return Err(ParseOutcome::Error(format!(
                        "error: unrecognized argument `{other}`\n\n{}",
                        Self::help(&exe)
                    )));
                }
            }
        }

        let input = input.ok_or_else(|| {
            ParseOutcome::Error(format!(
                "error: missing required --input\n\n{}",
                Self::help(&exe)
            ))
        })?;
        let password = password.ok_or_else(|| {
            ParseOutcome::Error(format!(
                "error: missing required --password\n\n{}",
                Self::help(&exe)
            ))
        })?;

        Ok(Self {
            input,
            password,
            verify_integrity,
            verify_password,
            output,
        })
    }

    fn help(exe: &OsString) -> String {
        let exe = exe.to_string_lossy();
        format!(
            "Usage: {exe} --input <path> --password <pw> [--verify-integrity] [--verify-password] [--output <path>]\n\
             \n\
             Decrypt an OOXML encrypted container (OLE/CFB with EncryptionInfo + EncryptedPackage).\n\
             \n\
             Options:\n\
               --input <path>           Path to the encrypted OLE/CFB file (.xlsx/.xlsm/.xlsb)\n\
               --password <pw>          Password to open the workbook\n\
               --verify-integrity       (Agile) verify the dataIntegrity HMAC\n\
               --verify-password        (Standard) check the verifier before decrypting\n\
               --output <path>          Write decrypted ZIP bytes to a file (defaults to stdout)\n\
               -h, --help               Print help\n"
        )
    }
}
