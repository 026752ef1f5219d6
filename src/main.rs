//! Binary entry point for the `devstack` CLI.

use std::io::{self, Write};
use std::process;

use camino::Utf8Path;
use cap_std::{ambient_authority, fs_utf8::Dir};
use clap::Parser;
use thiserror::Error;

use devstack::{StackConfig, StackTemplate, SynthError, synthesize};

mod cli;

use cli::{Cli, SynthCommand};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("synthesis failed: {0}")]
    Synth(#[from] SynthError),
    #[error("failed to render template: {0}")]
    Render(String),
    #[error("failed to write template `{path}`: {message}")]
    Write {
        path: String,
        message: String,
    },
}

fn main() {
    let cli = Cli::parse();
    let exit_code = match dispatch(cli) {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn dispatch(cli: Cli) -> Result<i32, CliError> {
    match cli {
        Cli::Synth(command) => synth_command(&command),
    }
}

fn synth_command(args: &SynthCommand) -> Result<i32, CliError> {
    let mut config =
        StackConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;
    apply_overrides(&mut config, args);

    let context = config
        .context()
        .map_err(|err| CliError::Config(err.to_string()))?;
    let template = synthesize(&context)?;

    if let Some(path) = args.output.as_deref() {
        let rendered = template
            .to_json()
            .map_err(|err| CliError::Render(err.to_string()))?;
        write_string_ambient(path, &rendered).map_err(|message| CliError::Write {
            path: path.to_owned(),
            message,
        })?;
    }

    render_outputs(io::stdout(), &template);
    Ok(0)
}

fn apply_overrides(config: &mut StackConfig, args: &SynthCommand) {
    if let Some(topology) = args.topology.as_deref() {
        config.topology = topology.to_owned();
    }
    if let Some(stack_name) = args.stack_name.as_deref() {
        config.stack_name = stack_name.to_owned();
    }
    if let Some(region) = args.region.as_deref() {
        config.region = region.to_owned();
    }
}

fn render_outputs(mut target: impl Write, template: &StackTemplate) {
    for output in template.outputs() {
        writeln!(target, "{}: {}", output.name, output.value).ok();
    }
}

fn write_string_ambient(path: &str, content: &str) -> Result<(), String> {
    let path_buf = Utf8Path::new(path);

    let (dir_path, file_path) = if path_buf.is_absolute() {
        let parent = path_buf
            .parent()
            .ok_or_else(|| format!("path has no parent directory: {path_buf}"))?;
        let file_name = path_buf
            .file_name()
            .ok_or_else(|| format!("path has no file name: {path_buf}"))?;
        (parent, Utf8Path::new(file_name))
    } else {
        (Utf8Path::new("."), path_buf)
    };

    let dir =
        Dir::open_ambient_dir(dir_path, ambient_authority()).map_err(|err| err.to_string())?;
    dir.write(file_path, content).map_err(|err| err.to_string())
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
