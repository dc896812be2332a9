use std::io::Write;

use serde::Serialize;

use crate::error::CliError;

/// Writes `value` as one JSON document followed by a newline on stdout.
pub fn render<T: Serialize>(value: &T, pretty: bool) -> Result<(), CliError> {
    let stdout = std::io::stdout();
    let mut handle = stdout.lock();
    write_json(&mut handle, value, pretty)?;
    handle.flush()?;
    Ok(())
}

fn write_json<W: Write, T: Serialize>(
    writer: &mut W,
    value: &T,
    pretty: bool,
) -> Result<(), CliError> {
    if pretty {
        serde_json::to_writer_pretty(&mut *writer, value)?;
    } else {
        serde_json::to_writer(&mut *writer, value)?;
    }
    writer.write_all(b"\n")?;
    Ok(())
}
