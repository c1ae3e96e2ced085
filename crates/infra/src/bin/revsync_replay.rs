//! Replays newline-delimited `InvoiceChange` JSON into the revenue ledger.
//!
//! ```text
//! revsync-replay [changes.ndjson]     # reads stdin when no file is given
//! ```
//!
//! With `DATABASE_URL` set the ledger lives in Postgres, otherwise in memory.
//! The touched periods are printed to stdout as JSON lines once the input is
//! exhausted.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};

use anyhow::{Context, bail};
use tracing::{info, warn};

use revsync_infra::{
    FailurePolicy, InMemoryRevenueRepository, PostgresRevenueRepository, RevenueRepository,
    RevenueSynchronizer, SyncConfig,
};
use revsync_invoicing::InvoiceChange;
use revsync_revenue::PeriodKey;

#[derive(Debug, Default)]
struct ReplaySummary {
    applied: u64,
    failed: u64,
    touched: Option<(PeriodKey, PeriodKey)>,
}

impl ReplaySummary {
    fn touch(&mut self, period: PeriodKey) {
        self.touched = Some(match self.touched {
            None => (period, period),
            Some((lo, hi)) => (lo.min(period), hi.max(period)),
        });
    }
}

fn main() -> anyhow::Result<()> {
    revsync_observability::init();

    let config = SyncConfig::from_env().context("invalid sync configuration")?;
    let input: Box<dyn BufRead> = match std::env::args().nth(1) {
        Some(path) => Box::new(BufReader::new(
            File::open(&path).with_context(|| format!("cannot open {path}"))?,
        )),
        None => Box::new(BufReader::new(io::stdin())),
    };

    match std::env::var("DATABASE_URL") {
        Ok(url) => {
            let repo = PostgresRevenueRepository::connect(&url).context("cannot connect to postgres")?;
            repo.ensure_schema().context("cannot create revenue schema")?;
            info!("replaying into postgres");
            replay(RevenueSynchronizer::new(repo, config), input)
        }
        Err(_) => {
            info!("DATABASE_URL not set; replaying into memory");
            replay(RevenueSynchronizer::new(InMemoryRevenueRepository::new(), config), input)
        }
    }
}

fn replay<R: RevenueRepository>(sync: RevenueSynchronizer<R>, input: Box<dyn BufRead>) -> anyhow::Result<()> {
    let halt = sync.config().failure_policy == FailurePolicy::Halt;
    let mut summary = ReplaySummary::default();

    for (idx, line) in input.lines().enumerate() {
        let line_no = idx + 1;
        let line = line.with_context(|| format!("read failed at line {line_no}"))?;
        if line.trim().is_empty() {
            continue;
        }

        let result = serde_json::from_str::<InvoiceChange>(&line)
            .map_err(anyhow::Error::from)
            .and_then(|change| sync.process_invoice_change(&change).map_err(anyhow::Error::from));

        match result {
            Ok(outcome) => {
                summary.applied += 1;
                for period in &outcome.periods {
                    summary.touch(period.period());
                }
            }
            Err(err) if halt => bail!("line {line_no}: {err:#}"),
            Err(err) => {
                summary.failed += 1;
                warn!(line = line_no, error = %format!("{err:#}"), "skipping change");
            }
        }
    }

    info!(applied = summary.applied, failed = summary.failed, "replay finished");

    if let Some((from, to)) = summary.touched {
        let stdout = io::stdout();
        let mut out = stdout.lock();
        for record in sync.list_by_date_range(from, to)? {
            serde_json::to_writer(&mut out, &record)?;
            writeln!(out)?;
        }
    }

    Ok(())
}
