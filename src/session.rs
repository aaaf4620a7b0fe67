use std::io::Write;

use anyhow::{bail, Context};
use chrono::NaiveDate;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::controller::{FetchOutcome, FetchResult, HeatmapController};
use crate::error::SourceError;
use crate::models::ActivityRecord;
use crate::render::{self, RendererConfig};

const HELP: &str = "\
commands:
  start <YYYY-MM-DD|clear>   set the start date
  end <YYYY-MM-DD|clear>     set the end date
  period <n|clear>           restrict to one fortnight
  reset                      clear all drafted filters
  apply                      fetch with the drafted filters
  show                       print the current heatmap
  status                     print filters and fetch state
  quit                       leave the session";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    Start(Option<NaiveDate>),
    End(Option<NaiveDate>),
    Period(Option<i64>),
    Reset,
    Apply,
    Show,
    Status,
    Help,
    Quit,
}

fn parse_date_arg(arg: Option<&str>) -> anyhow::Result<Option<NaiveDate>> {
    match arg {
        Some("clear") => Ok(None),
        Some(value) => NaiveDate::parse_from_str(value, "%Y-%m-%d")
            .map(Some)
            .with_context(|| format!("invalid date {value:?}, expected YYYY-MM-DD")),
        None => bail!("missing date argument"),
    }
}

impl SessionCommand {
    /// Blank lines parse to `None`.
    pub fn parse(line: &str) -> anyhow::Result<Option<Self>> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Ok(None);
        };
        let arg = words.next();

        let command = match verb.to_ascii_lowercase().as_str() {
            "start" => SessionCommand::Start(parse_date_arg(arg)?),
            "end" => SessionCommand::End(parse_date_arg(arg)?),
            "period" => match arg {
                Some("clear") => SessionCommand::Period(None),
                Some(value) => SessionCommand::Period(Some(
                    value
                        .parse()
                        .with_context(|| format!("invalid fortnight {value:?}"))?,
                )),
                None => bail!("missing fortnight argument"),
            },
            "reset" => SessionCommand::Reset,
            "apply" => SessionCommand::Apply,
            "show" => SessionCommand::Show,
            "status" => SessionCommand::Status,
            "help" | "?" => SessionCommand::Help,
            "quit" | "exit" => SessionCommand::Quit,
            other => bail!("unknown command {other:?}, try `help`"),
        };
        Ok(Some(command))
    }
}

/// Interactive filter form. Applies spawn background fetches whose results are
/// settled in arrival order; only the newest one is ever shown.
pub struct Session<W> {
    controller: HeatmapController,
    renderer: RendererConfig,
    out: W,
    tx: mpsc::UnboundedSender<FetchResult>,
    rx: mpsc::UnboundedReceiver<FetchResult>,
}

impl<W: Write> Session<W> {
    pub fn new(controller: HeatmapController, renderer: RendererConfig, out: W) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            controller,
            renderer,
            out,
            tx,
            rx,
        }
    }

    #[cfg(test)]
    pub fn controller(&self) -> &HeatmapController {
        &self.controller
    }

    #[cfg(test)]
    pub fn into_output(self) -> W {
        self.out
    }

    /// Loads date bounds, issues the initial fetch, then serves commands until
    /// `quit` or end of input. On end of input the newest fetch is awaited.
    pub async fn run<R>(&mut self, input: R) -> anyhow::Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        if let Err(err) = self.controller.load_bounds().await {
            warn!("date range unavailable: {err}");
            writeln!(self.out, "! {}: {err}", err.kind())?;
        }
        self.apply()?;

        let mut lines = input.lines();
        let mut input_closed = false;

        loop {
            tokio::select! {
                line = lines.next_line(), if !input_closed => {
                    match line.context("failed to read command")? {
                        Some(line) => {
                            if !self.handle_line(&line)? {
                                return Ok(());
                            }
                        }
                        None => input_closed = true,
                    }
                }
                Some((seq, result)) = self.rx.recv() => {
                    self.settle(seq, result)?;
                }
            }

            if input_closed && !self.controller.is_loading() {
                return Ok(());
            }
        }
    }

    fn apply(&mut self) -> anyhow::Result<()> {
        let ticket = self.controller.apply_filters();
        writeln!(self.out, "fetch #{} issued ({})", ticket.seq, ticket.criteria)?;
        self.controller.spawn_fetch(ticket, self.tx.clone());
        Ok(())
    }

    fn settle(
        &mut self,
        seq: u64,
        result: Result<Vec<ActivityRecord>, SourceError>,
    ) -> anyhow::Result<()> {
        match self.controller.complete(seq, result) {
            FetchOutcome::Displayed { seq, cohorts, cells } => {
                writeln!(self.out, "fetch #{seq} displayed: {cohorts} cohorts, {cells} cells")?;
                self.show()?;
            }
            FetchOutcome::Stale { seq, latest } => {
                debug!(seq, latest, "ignored superseded fetch");
            }
            FetchOutcome::KeptPrevious { seq } => {
                if let Some(err) = self.controller.last_error() {
                    writeln!(self.out, "! fetch #{seq} {}: {err}", err.kind())?;
                }
                writeln!(self.out, "  keeping the previous heatmap")?;
            }
        }
        Ok(())
    }

    fn show(&mut self) -> anyhow::Result<()> {
        match self.controller.snapshot() {
            Some(snapshot) => {
                let table = render::render_table(&snapshot.matrix, &self.renderer);
                write!(self.out, "{table}")?;
            }
            None if self.controller.is_loading() => writeln!(self.out, "loading...")?,
            None => writeln!(self.out, "no data yet")?,
        }
        Ok(())
    }

    fn status(&mut self) -> anyhow::Result<()> {
        let filters = self.controller.filters();
        let pending = if filters.is_dirty() { " (not applied)" } else { "" };
        writeln!(self.out, "draft:   {}{pending}", filters.draft())?;
        writeln!(self.out, "applied: {}", filters.applied())?;
        if let Some(bounds) = filters.bounds() {
            writeln!(self.out, "dates:   {bounds}")?;
        }
        if let Some(snapshot) = self.controller.snapshot() {
            writeln!(
                self.out,
                "showing: fetch #{} ({}) from {}",
                snapshot.seq,
                snapshot.criteria,
                snapshot.fetched_at.format("%H:%M:%S")
            )?;
        }
        if self.controller.is_loading() {
            writeln!(self.out, "loading: yes")?;
        }
        if let Some(err) = self.controller.last_error() {
            writeln!(self.out, "last error: {err}")?;
        }
        Ok(())
    }

    /// Returns `false` once the user asks to leave.
    fn handle_line(&mut self, line: &str) -> anyhow::Result<bool> {
        let command = match SessionCommand::parse(line) {
            Ok(Some(command)) => command,
            Ok(None) => return Ok(true),
            Err(err) => {
                writeln!(self.out, "! {err:#}")?;
                return Ok(true);
            }
        };

        let edit = match command {
            SessionCommand::Start(date) => self.controller.filters_mut().set_start_date(date),
            SessionCommand::End(date) => self.controller.filters_mut().set_end_date(date),
            SessionCommand::Period(period) => self.controller.filters_mut().set_period(period),
            SessionCommand::Reset => {
                self.controller.filters_mut().reset();
                Ok(())
            }
            SessionCommand::Apply => {
                self.apply()?;
                return Ok(true);
            }
            SessionCommand::Show => {
                self.show()?;
                return Ok(true);
            }
            SessionCommand::Status => {
                self.status()?;
                return Ok(true);
            }
            SessionCommand::Help => {
                writeln!(self.out, "{HELP}")?;
                return Ok(true);
            }
            SessionCommand::Quit => return Ok(false),
        };

        if let Err(err) = edit {
            writeln!(self.out, "! {err}")?;
        }
        Ok(true)
    }
}
