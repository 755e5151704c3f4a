//! Command-line surface and mode-flag resolution.

use clap::Parser;

use crate::list::MAX_ENTRIES;

#[derive(Parser)]
#[command(
    name = "multiselect",
    about = "Offer a menu of captured strings for every PRIMARY selection paste"
)]
pub struct Cli {
    /// Keep running after the selection is lost
    #[arg(short = 'd')]
    pub daemon: bool,

    /// Enable a hotkey (implies -d); may be given more than once
    #[arg(short = 'k', value_name = "KEY", value_enum, ignore_case = true)]
    pub hotkeys: Vec<HotkeyName>,

    /// Paste into the focused window even without a pasting client
    /// (implies -d and -k F1)
    #[arg(short = 'f')]
    pub force: bool,

    /// Capture every selection another client takes (implies -d)
    #[arg(short = 'c')]
    pub continuous: bool,

    /// Paste as soon as the cursor moves onto an entry
    #[arg(short = 'i')]
    pub immediate: bool,

    /// Byte separating a displayed label from the transmitted payload
    #[arg(short = 't', value_name = "SEP", value_parser = parse_separator)]
    pub separator: Option<u8>,

    /// Answer picks directly instead of provoking a fresh request with
    /// a synthetic middle click
    #[arg(short = 'p')]
    pub paste: bool,

    /// External helper probed before every paste
    #[arg(short = 'e', value_name = "PROG")]
    pub helper: Option<String>,

    /// Strings to offer, or "-" to read them from stdin
    #[arg(value_name = "STRING")]
    pub strings: Vec<String>,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum HotkeyName {
    F1,
    F2,
    F5,
}

/// Mode flags, fixed for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub daemon: bool,
    pub continuous: bool,
    pub immediate: bool,
    /// Synthetic-middle-click mode; off with `-p`.
    pub click: bool,
    pub force: bool,
    pub hotkey_f1: bool,
    pub hotkey_f2: bool,
    pub hotkey_f5: bool,
    pub separator: Option<u8>,
    pub helper: Option<String>,
}

/// Where the initial strings come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Stdin,
    Literals(Vec<String>),
}

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("daemon mode takes no strings on the command line")]
    DaemonWithStrings,
}

impl Cli {
    /// Resolve flag implications and split off the string source.
    pub fn into_options(self) -> Result<(RunOptions, Source), CliError> {
        let hotkey_f1 = self.force || self.hotkeys.contains(&HotkeyName::F1);
        let hotkey_f2 = self.hotkeys.contains(&HotkeyName::F2);
        let hotkey_f5 = self.hotkeys.contains(&HotkeyName::F5);
        let daemon = self.daemon || self.force || self.continuous || !self.hotkeys.is_empty();

        if daemon && !self.strings.is_empty() {
            return Err(CliError::DaemonWithStrings);
        }

        let source = if self.strings.len() == 1 && self.strings[0] == "-" {
            Source::Stdin
        } else {
            let mut strings = self.strings;
            strings.truncate(MAX_ENTRIES);
            Source::Literals(strings)
        };

        Ok((
            RunOptions {
                daemon,
                continuous: self.continuous,
                immediate: self.immediate,
                click: !self.paste,
                force: self.force,
                hotkey_f1,
                hotkey_f2,
                hotkey_f5,
                separator: self.separator,
                helper: self.helper,
            },
            source,
        ))
    }
}

fn parse_separator(value: &str) -> Result<u8, String> {
    match value.as_bytes() {
        [0] => Err("separator must not be NUL".into()),
        [byte] => Ok(*byte),
        _ => Err("separator must be a single byte".into()),
    }
}
