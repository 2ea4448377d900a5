//! Command-line parsing.
//!
//! One operation per line, whitespace-separated tokens, optionally followed
//! by the trailing flags `PERSISTENT` and `VIP=k` (both may be present, in
//! either order; they are stripped from the tail before the command is
//! interpreted).
//!
//! | Cmd | Operands                                | Meaning        |
//! |-----|-----------------------------------------|----------------|
//! | `O` | acc pw init_ils init_usd                | open           |
//! | `D` | acc pw amount {ILS\|USD}                | deposit        |
//! | `W` | acc pw amount {ILS\|USD}                | withdraw       |
//! | `B` | acc pw                                  | balance query  |
//! | `Q` | acc pw                                  | close account  |
//! | `T` | src pw dst amount {ILS\|USD}            | transfer       |
//! | `X` | acc pw from_cur `to` to_cur amount      | exchange       |
//! | `C` | target_agent_id                         | close agent    |
//! | `R` | k                                       | rollback       |
//! | `I` | acc pw amount cur [`is`] duration_ms    | invest         |
//! | `S` | duration_ms                             | scheduled break|

use std::str::FromStr;

use thiserror::Error;

use crate::models::account::{AccountId, AgentId, Currency};

/// A parsed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Open {
        id: AccountId,
        password: u32,
        init_ils: i64,
        init_usd: i64,
    },
    Deposit {
        id: AccountId,
        password: u32,
        amount: i64,
        currency: Currency,
    },
    Withdraw {
        id: AccountId,
        password: u32,
        amount: i64,
        currency: Currency,
    },
    Balance {
        id: AccountId,
        password: u32,
    },
    CloseAccount {
        id: AccountId,
        password: u32,
    },
    Transfer {
        src: AccountId,
        password: u32,
        dst: AccountId,
        amount: i64,
        currency: Currency,
    },
    Exchange {
        id: AccountId,
        password: u32,
        from: Currency,
        to: Currency,
        amount: i64,
    },
    CloseAgent {
        target: AgentId,
    },
    Rollback {
        iterations_back: i64,
    },
    Invest {
        id: AccountId,
        password: u32,
        amount: i64,
        currency: Currency,
        duration_ms: i64,
    },
    Sleep {
        duration_ms: i64,
    },
}

impl Operation {
    /// Whether this is the scheduled-break command, which neither paces nor
    /// participates in persistence.
    pub fn is_sleep(&self) -> bool {
        matches!(self, Operation::Sleep { .. })
    }
}

/// A parsed line: the operation plus its execution flags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directive {
    pub op: Operation,
    pub persistent: bool,
    /// VIP priority when the line is routed to the expedited queue.
    pub vip_priority: Option<u8>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("empty command line")]
    EmptyLine,
    #[error("unknown command {0:?}")]
    UnknownCommand(String),
    #[error("command {0} is missing an operand")]
    MissingOperand(char),
    #[error("invalid number {0:?}")]
    InvalidNumber(String),
    #[error("invalid currency {0:?}")]
    InvalidCurrency(String),
    #[error("VIP priority {0} outside 1..=100")]
    InvalidVipPriority(i64),
}

fn number<T: FromStr>(token: &str) -> Result<T, ParseError> {
    token
        .parse()
        .map_err(|_| ParseError::InvalidNumber(token.to_owned()))
}

fn currency(token: &str) -> Result<Currency, ParseError> {
    Currency::parse(token).ok_or_else(|| ParseError::InvalidCurrency(token.to_owned()))
}

/// Strip trailing `PERSISTENT` / `VIP=k` flags off the token tail.
fn strip_flags(tokens: &mut Vec<&str>) -> Result<(bool, Option<u8>), ParseError> {
    let mut persistent = false;
    let mut vip_priority = None;
    while let Some(&last) = tokens.last() {
        if last == "PERSISTENT" {
            persistent = true;
            tokens.pop();
            continue;
        }
        if let Some(value) = last.strip_prefix("VIP=") {
            let priority: i64 = number(value)?;
            if !(1..=100).contains(&priority) {
                return Err(ParseError::InvalidVipPriority(priority));
            }
            vip_priority = Some(priority as u8);
            tokens.pop();
            continue;
        }
        break;
    }
    Ok((persistent, vip_priority))
}

/// Parse one command line into a [`Directive`].
pub fn parse_line(line: &str) -> Result<Directive, ParseError> {
    let mut tokens: Vec<&str> = line.split_whitespace().collect();
    let (persistent, vip_priority) = strip_flags(&mut tokens)?;
    let mut tokens = tokens.into_iter();
    let command = tokens.next().ok_or(ParseError::EmptyLine)?;

    let mut operand = |cmd: char| tokens.next().ok_or(ParseError::MissingOperand(cmd));

    let op = match command {
        "O" => Operation::Open {
            id: number(operand('O')?)?,
            password: number(operand('O')?)?,
            init_ils: number(operand('O')?)?,
            init_usd: number(operand('O')?)?,
        },
        "D" => Operation::Deposit {
            id: number(operand('D')?)?,
            password: number(operand('D')?)?,
            amount: number(operand('D')?)?,
            currency: currency(operand('D')?)?,
        },
        "W" => Operation::Withdraw {
            id: number(operand('W')?)?,
            password: number(operand('W')?)?,
            amount: number(operand('W')?)?,
            currency: currency(operand('W')?)?,
        },
        "B" => Operation::Balance {
            id: number(operand('B')?)?,
            password: number(operand('B')?)?,
        },
        "Q" => Operation::CloseAccount {
            id: number(operand('Q')?)?,
            password: number(operand('Q')?)?,
        },
        "T" => Operation::Transfer {
            src: number(operand('T')?)?,
            password: number(operand('T')?)?,
            dst: number(operand('T')?)?,
            amount: number(operand('T')?)?,
            currency: currency(operand('T')?)?,
        },
        "X" => {
            let id = number(operand('X')?)?;
            let password = number(operand('X')?)?;
            let from = currency(operand('X')?)?;
            let to_token = operand('X')?;
            // The literal "to" separator is optional on the wire.
            let to = if to_token == "to" {
                currency(operand('X')?)?
            } else {
                currency(to_token)?
            };
            Operation::Exchange {
                id,
                password,
                from,
                to,
                amount: number(operand('X')?)?,
            }
        }
        "C" => Operation::CloseAgent {
            target: number(operand('C')?)?,
        },
        "R" => Operation::Rollback {
            iterations_back: number(operand('R')?)?,
        },
        "I" => {
            let id = number(operand('I')?)?;
            let password = number(operand('I')?)?;
            let amount = number(operand('I')?)?;
            let cur = currency(operand('I')?)?;
            let next = operand('I')?;
            // Accept both "I acc pw amount cur is 100" and the bare form.
            let duration_ms = if next == "is" {
                number(operand('I')?)?
            } else {
                number(next)?
            };
            Operation::Invest {
                id,
                password,
                amount,
                currency: cur,
                duration_ms,
            }
        }
        "S" => Operation::Sleep {
            duration_ms: number(operand('S')?)?,
        },
        other => return Err(ParseError::UnknownCommand(other.to_owned())),
    };

    Ok(Directive {
        op,
        persistent,
        vip_priority,
    })
}
