//! Per-row cryptographic shaping of dequeued token rows into the
//! comma-separated output fields the downstream sender consumes.

use mailroom_crypto::{encode_url_safe, MacSigner};
use thiserror::Error;

const ACTIVATE_PREFIX: &[u8] = b"/activate";
const RECOVER_PREFIX: &[u8] = b"/recover";
const SECRET_LEN: usize = 32;

/// The action a dequeued token row is for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Activation,
    PasswordRecovery,
    /// Any value the upstream schema wasn't expected to produce. Preserved
    /// rather than rejected so the shaper stays position-stable even for
    /// rows with an unrecognized action string.
    Other(String),
}

impl Action {
    /// Parses the raw action string returned by the dequeue query.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "activation" => Action::Activation,
            "password_recovery" => Action::PasswordRecovery,
            other => Action::Other(other.to_string()),
        }
    }

    fn code(&self) -> u8 {
        match self {
            Action::Activation => 1,
            Action::PasswordRecovery => 2,
            Action::Other(_) => 0,
        }
    }
}

/// One row returned by the dequeue query, prior to shaping.
#[derive(Debug, Clone)]
pub struct DequeuedRow {
    pub action: Action,
    pub email: String,
    pub login: String,
    pub secret: Vec<u8>,
    pub code: String,
}

/// The five output fields for one shaped row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapedRow {
    pub action_code: u8,
    pub email: String,
    pub login: String,
    pub encoded_token: String,
    pub code: String,
}

impl ShapedRow {
    /// Renders the row as `action_code,email,login,encoded_token,code`.
    pub fn to_line(&self) -> String {
        format!(
            "{},{},{},{},{}",
            self.action_code, self.email, self.login, self.encoded_token, self.code
        )
    }
}

/// Errors that cause a single row to be skipped (the batch continues).
#[derive(Error, Debug)]
pub enum ShapeError {
    #[error("secret must be {expected} bytes, got {actual}")]
    WrongSecretLength { expected: usize, actual: usize },
}

/// Builds the MAC signing input for a row's action.
fn signing_input(row: &DequeuedRow) -> Vec<u8> {
    match &row.action {
        Action::Activation => {
            let mut input = Vec::with_capacity(ACTIVATE_PREFIX.len() + row.secret.len());
            input.extend_from_slice(ACTIVATE_PREFIX);
            input.extend_from_slice(&row.secret);
            input
        }
        Action::PasswordRecovery => {
            let mut input = Vec::with_capacity(
                RECOVER_PREFIX.len() + row.secret.len() + row.code.len(),
            );
            input.extend_from_slice(RECOVER_PREFIX);
            input.extend_from_slice(&row.secret);
            input.extend_from_slice(row.code.as_bytes());
            input
        }
        // Preserves the Open Question resolution in DESIGN.md: unrecognized
        // actions sign over an empty input rather than being dropped, so
        // the row still gets a position-stable (if not secret-dependent)
        // shaped output.
        Action::Other(_) => Vec::new(),
    }
}

/// Shapes one dequeued row. Skips (returns `Err`) rows whose secret is not
/// exactly 32 bytes; logs the unrecognized-action case but still shapes it.
pub fn shape_row(row: &DequeuedRow, signer: &MacSigner) -> Result<ShapedRow, ShapeError> {
    if row.secret.len() != SECRET_LEN {
        return Err(ShapeError::WrongSecretLength {
            expected: SECRET_LEN,
            actual: row.secret.len(),
        });
    }

    if let Action::Other(raw) = &row.action {
        tracing::warn!(action = %raw, "unrecognized action, shaping with code 0");
    }

    let input = signing_input(row);
    let mac = signer.sign(&input);

    let mut artifact = Vec::with_capacity(row.secret.len() + mac.len());
    artifact.extend_from_slice(&row.secret);
    artifact.extend_from_slice(&mac);

    Ok(ShapedRow {
        action_code: row.action.code(),
        email: row.email.clone(),
        login: row.login.clone(),
        encoded_token: encode_url_safe(&artifact),
        code: row.code.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> Vec<u8> {
        hex::decode("deadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeefdeadbeef").unwrap()
    }

    // S1 — single activation row (spec.md §8, scenario S1).
    #[test]
    fn scenario_s1_single_activation_row() {
        let signer = MacSigner::new(&key()).unwrap();
        let row = DequeuedRow {
            action: Action::parse("activation"),
            email: "a@b".to_string(),
            login: "x".to_string(),
            secret: vec![0u8; 32],
            code: String::new(),
        };

        let shaped = shape_row(&row, &signer).unwrap();
        assert_eq!(shaped.action_code, 1);
        assert_eq!(
            shaped.encoded_token,
            "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAADvqa1Ncfgcr-FPj4R50YNn6HnCVPFQYn2RYRIZjMjyiQ"
        );
        assert_eq!(shaped.to_line(), format!("1,a@b,x,{},", shaped.encoded_token));
    }

    // S2 — mixed batch (spec.md §8, scenario S2).
    #[test]
    fn scenario_s2_mixed_batch() {
        let signer = MacSigner::new(&key()).unwrap();

        let rows = vec![
            DequeuedRow {
                action: Action::parse("activation"),
                email: "j@k".to_string(),
                login: "jk".to_string(),
                secret: vec![0xaa; 32],
                code: String::new(),
            },
            DequeuedRow {
                action: Action::parse("password_recovery"),
                email: "m@n".to_string(),
                login: "mn".to_string(),
                secret: vec![0xbb; 32],
                code: "12345".to_string(),
            },
            DequeuedRow {
                action: Action::parse("activation"),
                email: "o@p".to_string(),
                login: "op".to_string(),
                secret: vec![0xcc; 32],
                code: String::new(),
            },
        ];

        let shaped: Vec<ShapedRow> = rows
            .iter()
            .map(|r| shape_row(r, &signer).unwrap())
            .collect();

        assert_eq!(shaped[0].action_code, 1);
        assert_eq!(shaped[1].action_code, 2);
        assert_eq!(shaped[2].action_code, 1);

        assert_eq!(
            shaped[0].encoded_token,
            "qqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqqphVrHoTme23Sqk0t4DYWKhlUg8J2sytD8qgmS6QGOyNg"
        );
        assert_eq!(
            shaped[1].encoded_token,
            "u7u7u7u7u7u7u7u7u7u7u7u7u7u7u7u7u7u7u7u7u7so1SGZLrJOjL6o2q6RE1OQbK_wiFI4N2pdRP2L2_nJZg"
        );
        assert_eq!(
            shaped[2].encoded_token,
            "zMzMzMzMzMzMzMzMzMzMzMzMzMzMzMzMzMzMzMzMzMzNo4UshVQMRdMuYg0szIr9MBGmCCR9sCwqGf_IuIs4yQ"
        );

        let line = shaped
            .iter()
            .map(ShapedRow::to_line)
            .collect::<Vec<_>>()
            .join(",");
        assert_eq!(line.split(',').count(), 15);
    }

    // S6 — malformed secret among a batch of three (spec.md §8, scenario S6).
    #[test]
    fn scenario_s6_malformed_secret_is_skipped() {
        let signer = MacSigner::new(&key()).unwrap();

        let rows = vec![
            DequeuedRow {
                action: Action::parse("activation"),
                email: "a@a".to_string(),
                login: "a".to_string(),
                secret: vec![1u8; 32],
                code: String::new(),
            },
            DequeuedRow {
                action: Action::parse("activation"),
                email: "b@b".to_string(),
                login: "b".to_string(),
                secret: vec![2u8; 31], // one byte short
                code: String::new(),
            },
            DequeuedRow {
                action: Action::parse("activation"),
                email: "c@c".to_string(),
                login: "c".to_string(),
                secret: vec![3u8; 32],
                code: String::new(),
            },
        ];

        let shaped: Vec<ShapedRow> = rows
            .iter()
            .filter_map(|r| shape_row(r, &signer).ok())
            .collect();

        assert_eq!(shaped.len(), 2);
        assert_eq!(shaped[0].email, "a@a");
        assert_eq!(shaped[1].email, "c@c");
    }

    #[test]
    fn unrecognized_action_maps_to_code_zero_and_is_still_shaped() {
        let signer = MacSigner::new(&key()).unwrap();
        let row = DequeuedRow {
            action: Action::parse("something_else"),
            email: "z@z".to_string(),
            login: "z".to_string(),
            secret: vec![9u8; 32],
            code: "00000".to_string(),
        };

        let shaped = shape_row(&row, &signer).unwrap();
        assert_eq!(shaped.action_code, 0);
        assert_eq!(shaped.email, "z@z");
    }

    #[test]
    fn password_recovery_signing_input_includes_code() {
        let signer = MacSigner::new(&key()).unwrap();
        let base_secret = vec![5u8; 32];

        let row_with_code = DequeuedRow {
            action: Action::PasswordRecovery,
            email: "e".to_string(),
            login: "l".to_string(),
            secret: base_secret.clone(),
            code: "11111".to_string(),
        };
        let row_with_different_code = DequeuedRow {
            code: "22222".to_string(),
            ..row_with_code.clone()
        };

        let a = shape_row(&row_with_code, &signer).unwrap();
        let b = shape_row(&row_with_different_code, &signer).unwrap();
        assert_ne!(a.encoded_token, b.encoded_token);
    }

    #[test]
    fn action_parse_round_trips_known_values() {
        assert_eq!(Action::parse("activation"), Action::Activation);
        assert_eq!(Action::parse("password_recovery"), Action::PasswordRecovery);
        assert_eq!(
            Action::parse("mystery"),
            Action::Other("mystery".to_string())
        );
    }
}
