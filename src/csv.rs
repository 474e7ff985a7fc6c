use serde::{Deserialize, Serialize};
use std::io;
use std::path::Path;
use thiserror::Error;

use crate::Amount;
use crate::model::{Balance, Order, UserId, Withdrawal};

/// Errors that can occur when reading requests or writing reports
#[derive(Debug, Error)]
pub enum CsvError {
    #[error("failed to open csv file: {0}")]
    Open(csv::Error),

    #[error("line {line}: failed to parse row: {source}")]
    Parse { line: usize, source: csv::Error },

    #[error("line {line}: unrecognized request type '{kind}'")]
    UnrecognizedType { line: usize, kind: String },

    #[error("line {line}: withdraw missing sum")]
    MissingSum { line: usize },

    #[error("line {line}: sum {sum} is not a representable amount")]
    InvalidSum { line: usize, sum: f64 },

    #[error("failed to write csv row: {0}")]
    Write(#[from] csv::Error),

    #[error("failed to flush csv output: {0}")]
    Flush(#[from] io::Error),
}

/// A request read from an import file, for an already authenticated user.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Upload {
        user: UserId,
        number: String,
    },
    Withdraw {
        user: UserId,
        number: String,
        sum: Amount,
    },
}

#[derive(Debug, Deserialize)]
struct InputRow {
    r#type: String,
    user: UserId,
    number: String,
    sum: Option<f64>,
}

#[derive(Debug, Serialize)]
struct BalanceRow {
    user: UserId,
    current: String,
    withdrawn: String,
}

#[derive(Debug, Serialize)]
struct OrderRow<'a> {
    number: &'a str,
    status: &'static str,
    accrual: String,
    uploaded_at: String,
}

#[derive(Debug, Serialize)]
struct WithdrawalRow<'a> {
    order: &'a str,
    sum: String,
    processed_at: String,
}

/// Read upload/withdraw requests from a csv file
pub fn read_requests(
    path: impl AsRef<Path>,
) -> Result<impl Iterator<Item = Result<Request, CsvError>>, CsvError> {
    let reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(CsvError::Open)?;

    Ok(reader
        .into_deserialize::<InputRow>()
        .enumerate()
        .map(|(idx, result)| {
            let line = idx + 2; // 1-indexed, skip header
            let row = result.map_err(|source| CsvError::Parse { line, source })?;
            match row.r#type.as_str() {
                "upload" => Ok(Request::Upload {
                    user: row.user,
                    number: row.number,
                }),
                "withdraw" => {
                    let sum = row.sum.ok_or(CsvError::MissingSum { line })?;
                    let sum = Amount::from_float(sum).ok_or(CsvError::InvalidSum { line, sum })?;
                    Ok(Request::Withdraw {
                        user: row.user,
                        number: row.number,
                        sum,
                    })
                }
                other => Err(CsvError::UnrecognizedType {
                    line,
                    kind: other.to_string(),
                }),
            }
        }))
}

/// Write a balance as `user,current,withdrawn`
pub fn write_balance(out: impl io::Write, balance: &Balance) -> Result<(), CsvError> {
    let mut writer = csv::Writer::from_writer(out);
    writer.serialize(BalanceRow {
        user: balance.user_id(),
        current: balance.current().to_string(),
        withdrawn: balance.withdrawn().to_string(),
    })?;
    writer.flush()?;
    Ok(())
}

/// Write orders as `number,status,accrual,uploaded_at`
pub fn write_orders<'a>(
    out: impl io::Write,
    orders: impl IntoIterator<Item = &'a Order>,
) -> Result<(), CsvError> {
    let mut writer = csv::Writer::from_writer(out);
    let mut empty = true;
    for order in orders {
        empty = false;
        writer.serialize(OrderRow {
            number: order.number(),
            status: order.status().as_str(),
            accrual: order.accrual().map(|a| a.to_string()).unwrap_or_default(),
            uploaded_at: order.uploaded_at().to_rfc3339(),
        })?;
    }
    if empty {
        writer.write_record(["number", "status", "accrual", "uploaded_at"])?;
    }
    writer.flush()?;
    Ok(())
}

/// Write withdrawals as `order,sum,processed_at`
pub fn write_withdrawals<'a>(
    out: impl io::Write,
    withdrawals: impl IntoIterator<Item = &'a Withdrawal>,
) -> Result<(), CsvError> {
    let mut writer = csv::Writer::from_writer(out);
    let mut empty = true;
    for withdrawal in withdrawals {
        empty = false;
        writer.serialize(WithdrawalRow {
            order: withdrawal.order_number(),
            sum: withdrawal.sum().to_string(),
            processed_at: withdrawal.processed_at().to_rfc3339(),
        })?;
    }
    if empty {
        writer.write_record(["order", "sum", "processed_at"])?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OrderStatus;
    use chrono::{TimeZone, Utc};
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn write_csv(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn read(content: &str) -> Vec<Result<Request, CsvError>> {
        let file = write_csv(content);
        read_requests(file.path()).unwrap().collect()
    }

    #[test]
    fn read_upload() {
        let results = read("type,user,number,sum\nupload,1,79927398713,\n");
        assert_eq!(results.len(), 1);
        assert_eq!(
            results[0].as_ref().unwrap(),
            &Request::Upload {
                user: 1,
                number: "79927398713".into()
            }
        );
    }

    #[test]
    fn read_withdraw() {
        let results = read("type,user,number,sum\nwithdraw,2,12345678903,5.25\n");
        assert_eq!(
            results[0].as_ref().unwrap(),
            &Request::Withdraw {
                user: 2,
                number: "12345678903".into(),
                sum: Amount::from_float(5.25).unwrap(),
            }
        );
    }

    #[test]
    fn leading_zeros_survive() {
        let results = read("type,user,number,sum\nupload,1,0079927398713,\n");
        assert!(matches!(
            results[0].as_ref().unwrap(),
            Request::Upload { number, .. } if number == "0079927398713"
        ));
    }

    #[test]
    fn read_with_whitespace() {
        let results = read("type, user, number, sum\nwithdraw, 1, 12345678903, 10.0\n");
        assert_eq!(results.len(), 1);
        assert!(results[0].is_ok());
    }

    #[test]
    fn read_returns_error_for_unknown_type() {
        let results = read("type,user,number,sum\ndeposit,1,79927398713,10.0\n");
        let err = results[0].as_ref().unwrap_err();
        assert!(matches!(err, CsvError::UnrecognizedType { line: 2, .. }));
    }

    #[test]
    fn read_returns_error_for_missing_sum() {
        let results = read("type,user,number,sum\nupload,1,79927398713,\nwithdraw,1,12345678903,\n");
        assert!(results[0].is_ok());
        let err = results[1].as_ref().unwrap_err();
        assert!(matches!(err, CsvError::MissingSum { line: 3 }));
    }

    #[test]
    fn read_returns_error_for_unrepresentable_sum() {
        let results = read("type,user,number,sum\nwithdraw,1,12345678903,1e300\nwithdraw,1,12345678903,NaN\n");
        assert!(matches!(results[0], Err(CsvError::InvalidSum { line: 2, .. })));
        assert!(matches!(results[1], Err(CsvError::InvalidSum { line: 3, .. })));
    }

    #[test]
    fn read_returns_error_for_bad_user() {
        let results = read("type,user,number,sum\nupload,abc,79927398713,\n");
        let err = results[0].as_ref().unwrap_err();
        assert!(matches!(err, CsvError::Parse { line: 2, .. }));
    }

    #[test]
    fn missing_file_is_reported() {
        assert!(matches!(
            read_requests("does/not/exist.csv"),
            Err(CsvError::Open(_))
        ));
    }

    #[test]
    fn balance_report() {
        let mut out = Vec::new();
        let balance = Balance::restore(
            1,
            Amount::from_float(50.5).unwrap(),
            Amount::from_float(50.0).unwrap(),
        );
        write_balance(&mut out, &balance).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "user,current,withdrawn\n1,50.5,50\n"
        );
    }

    #[test]
    fn orders_report() {
        let uploaded_at = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap();
        let orders = [
            Order::restore(
                2,
                1,
                "12345678903".into(),
                OrderStatus::Processed,
                Some(Amount::from_float(100.5).unwrap()),
                uploaded_at,
            ),
            Order::restore(1, 1, "79927398713".into(), OrderStatus::New, None, uploaded_at),
        ];

        let mut out = Vec::new();
        write_orders(&mut out, &orders).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], "number,status,accrual,uploaded_at");
        assert_eq!(lines[1], "12345678903,PROCESSED,100.5,2024-01-15T10:30:00+00:00");
        assert_eq!(lines[2], "79927398713,NEW,,2024-01-15T10:30:00+00:00");
    }

    #[test]
    fn empty_reports_keep_header() {
        let mut out = Vec::new();
        write_withdrawals(&mut out, &[]).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "order,sum,processed_at\n");
    }
}
