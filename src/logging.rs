use crate::{common::*, message::StatsRecord};
use tokio::sync::mpsc;

/// Appends stats rows to the per-run CSV record.
///
/// Best-effort: the directory is created on the first row, any I/O failure is
/// reported at WARN and the row dropped. Training never aborts because a log
/// row was lost.
pub async fn logging_worker(
    stats_file: PathBuf,
    mut stats_rx: mpsc::Receiver<StatsRecord>,
) -> Result<()> {
    let mut writer: Option<csv::Writer<fs::File>> = None;

    while let Some(record) = stats_rx.recv().await {
        if writer.is_none() {
            match open_writer(&stats_file) {
                Ok(new_writer) => writer = Some(new_writer),
                Err(err) => {
                    warn!(
                        "unable to open stats file '{}': {:#}",
                        stats_file.display(),
                        err
                    );
                    continue;
                }
            }
        }

        if let Some(writer) = writer.as_mut() {
            if let Err(err) = write_row(writer, &record) {
                warn!(
                    "unable to append to stats file '{}': {:#}",
                    stats_file.display(),
                    err
                );
            }
        }
    }

    Ok(())
}

fn open_writer(path: &Path) -> Result<csv::Writer<fs::File>> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    // append across runs; the header is written only for a fresh file
    let has_rows = path.is_file() && fs::metadata(path)?.len() > 0;
    let file = fs::OpenOptions::new().create(true).append(true).open(path)?;

    Ok(csv::WriterBuilder::new()
        .has_headers(!has_rows)
        .from_writer(file))
}

fn write_row(writer: &mut csv::Writer<fs::File>, record: &StatsRecord) -> Result<()> {
    writer.serialize(record)?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn toy_record(epoch: usize, batch: usize) -> StatsRecord {
        StatsRecord {
            epoch,
            batch,
            batch_time: 0.125,
            loss: 0.7,
            loss_avg: 0.69,
            acc: 0.5,
            acc_avg: 0.51,
        }
    }

    #[tokio::test]
    async fn stats_rows_appended_test() -> Result<()> {
        let dir = std::env::temp_dir().join(format!("caption-gan-stats-{}", std::process::id()));
        let stats_file = dir.join("dis").join("pretrain_dis_greedy_resnet152.csv");

        let (tx, rx) = mpsc::channel(4);
        let worker = tokio::spawn(logging_worker(stats_file.clone(), rx));

        tx.send(toy_record(0, 0)).await?;
        tx.send(toy_record(0, 50)).await?;
        drop(tx);
        worker.await??;

        let text = fs::read_to_string(&stats_file)?;
        let lines: Vec<_> = text.lines().collect();
        ensure!(lines.len() == 3, "expected header and two rows");
        ensure!(lines[0].starts_with("epoch,batch,batch_time"));
        ensure!(lines[1].starts_with("0,0,"));
        ensure!(lines[2].starts_with("0,50,"));

        fs::remove_dir_all(&dir).ok();
        Ok(())
    }

    #[tokio::test]
    async fn no_rows_no_file_test() -> Result<()> {
        let dir = std::env::temp_dir().join(format!("caption-gan-nostats-{}", std::process::id()));
        let stats_file = dir.join("pretrain_dis_greedy_resnet152.csv");

        let (tx, rx) = mpsc::channel::<StatsRecord>(1);
        drop(tx);
        logging_worker(stats_file.clone(), rx).await?;

        // a disabled or idle run must not even create the stats directory
        ensure!(!stats_file.exists());
        ensure!(!dir.exists());

        Ok(())
    }
}
