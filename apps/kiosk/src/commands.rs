use shared::domain::{FilterKind, FrameId, TransactionId};

/// One line typed at the kiosk console.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Start,
    Copies(u32),
    Pay,
    Verify(Option<TransactionId>),
    Filter(FilterKind),
    Frame(FrameId),
    Layout,
    Continue,
    RetryShot,
    Preview,
    Print,
    Retake,
    Status,
    Exit,
    Help,
    Quit,
}

pub const HELP: &str = "\
commands:
  start              begin a session
  copies <n>         choose print copies
  pay                create a payment order
  verify [txn]       verify the returned transaction
  filter color|bw    choose the filter
  frame <id>         choose the frame
  layout             show the frame slots
  continue           start the capture sequence
  retry-shot         retry a stalled shot
  preview            compose the strip
  print              print and finish
  retake             redo the photos once
  status             show the session
  exit               operator exit to idle
  quit               stop the kiosk";

pub fn parse_command(line: &str) -> Result<Command, String> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Err("empty command".to_string());
    };
    let arg = words.next();
    if let Some(extra) = words.next() {
        return Err(format!("unexpected argument '{extra}'"));
    }

    let command = match (head.to_ascii_lowercase().as_str(), arg) {
        ("start", None) => Command::Start,
        ("copies", Some(n)) => Command::Copies(
            n.parse()
                .map_err(|_| format!("copies must be a number, got '{n}'"))?,
        ),
        ("pay", None) => Command::Pay,
        ("verify", txn) => Command::Verify(txn.map(TransactionId::new)),
        ("filter", Some(raw)) => Command::Filter(
            FilterKind::parse(raw).ok_or_else(|| format!("unknown filter '{raw}'"))?,
        ),
        ("frame", Some(id)) => Command::Frame(FrameId::new(id)),
        ("layout", None) => Command::Layout,
        ("continue", None) => Command::Continue,
        ("retry-shot", None) => Command::RetryShot,
        ("preview", None) => Command::Preview,
        ("print", None) => Command::Print,
        ("retake", None) => Command::Retake,
        ("status", None) => Command::Status,
        ("exit", None) => Command::Exit,
        ("help", None) => Command::Help,
        ("quit", None) => Command::Quit,
        (head, _) => return Err(format!("unknown command '{head}' (try 'help')")),
    };
    Ok(command)
}

#[cfg(test)]
#[path = "tests/commands_tests.rs"]
mod tests;
