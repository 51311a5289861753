//! Marketing budget transfer between two albums.
//!
//! The transfer runs in one read-write transaction. The store may abort and
//! re-run it any number of times, so [`transfer_attempt`] reads every balance
//! it decides on through the transaction handle and reports its decision only
//! through its return value. The transfer notice is logged once, after the
//! commit has been confirmed.

use super::model::AlbumKey;
use super::{CatalogError, Result, StoreContext, ALBUMS, MARKETING_BUDGET};
use crate::observability::metrics::record_transfer;
use crate::storage::{Client, CommitResponse, ReadWriteTransaction, Statement, Value};

const UPDATE_BUDGET: &str = r#"UPDATE Albums
SET MarketingBudget = @AlbumBudget
WHERE SingerId = @SingerId AND AlbumId = @AlbumId"#;

const TOUCH_ALBUMS: &str = r#"UPDATE Albums
SET LastUpdateTime = @CommitTimestamp
WHERE (SingerId, AlbumId) IN (VALUES (@FromSingerId, @FromAlbumId), (@ToSingerId, @ToAlbumId))"#;

/// A request to move `amount` of marketing budget from one album to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transfer {
    from: AlbumKey,
    to: AlbumKey,
    amount: i64,
}

impl Transfer {
    /// # Errors
    ///
    /// [`CatalogError::InvalidTransfer`] if `amount` is not positive or both
    /// keys name the same album.
    pub fn new(from: AlbumKey, to: AlbumKey, amount: i64) -> Result<Self> {
        if amount <= 0 {
            return Err(CatalogError::InvalidTransfer(format!(
                "amount must be positive, got {amount}"
            )));
        }
        if from == to {
            return Err(CatalogError::InvalidTransfer(format!(
                "source and destination are both album {from}"
            )));
        }
        Ok(Self { from, to, amount })
    }

    pub fn source(&self) -> AlbumKey {
        self.from
    }

    pub fn destination(&self) -> AlbumKey {
        self.to
    }

    pub fn amount(&self) -> i64 {
        self.amount
    }
}

/// What the committed attempt of a transfer decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    /// The budget moved. Carries both balances after the move.
    Moved { from_budget: i64, to_budget: i64 },
    /// The source held less than the amount, or no budget at all. Nothing was
    /// written.
    InsufficientBudget { available: Option<i64> },
}

impl TransferOutcome {
    fn label(&self) -> &'static str {
        match self {
            TransferOutcome::Moved { .. } => "moved",
            TransferOutcome::InsufficientBudget { .. } => "insufficient",
        }
    }
}

fn read_budget(txn: &mut ReadWriteTransaction<'_>, key: AlbumKey) -> Result<Option<i64>> {
    txn.read_row(ALBUMS, &key.into(), &[MARKETING_BUDGET], |row| row.get(0))
        .context(|| format!("read marketing budget of album {key}"))
}

fn write_budget(txn: &mut ReadWriteTransaction<'_>, key: AlbumKey, budget: i64) -> Result<()> {
    let stmt = Statement::new(UPDATE_BUDGET)
        .bind("AlbumBudget", budget)
        .bind("SingerId", key.singer_id)
        .bind("AlbumId", key.album_id);
    txn.update(&stmt)
        .context(|| format!("update marketing budget of album {key}"))?;
    Ok(())
}

/// One attempt of the transfer, against the transaction's own snapshot.
///
/// 1. Read the source budget. If it is unset or below the amount, stop and
///    let the transaction commit with no writes.
/// 2. Read the destination budget.
/// 3. Write the new destination and source budgets.
/// 4. Stamp both rows with the commit timestamp in one statement.
pub fn transfer_attempt(txn: &mut ReadWriteTransaction<'_>, transfer: &Transfer) -> Result<TransferOutcome> {
    let Transfer { from, to, amount } = *transfer;

    let available = read_budget(txn, from)?;
    let from_balance = match available {
        Some(balance) if balance >= amount => balance,
        _ => return Ok(TransferOutcome::InsufficientBudget { available }),
    };

    let to_balance = read_budget(txn, to)?.ok_or(CatalogError::BudgetUnset { key: to })?;
    let to_budget = to_balance
        .checked_add(amount)
        .ok_or(CatalogError::BudgetOverflow { key: to })?;
    let from_budget = from_balance - amount;

    write_budget(txn, to, to_budget)?;
    write_budget(txn, from, from_budget)?;

    let touch = Statement::new(TOUCH_ALBUMS)
        .bind("CommitTimestamp", Value::CommitTimestamp)
        .bind("FromSingerId", from.singer_id)
        .bind("FromAlbumId", from.album_id)
        .bind("ToSingerId", to.singer_id)
        .bind("ToAlbumId", to.album_id);
    txn.update(&touch)
        .context(|| format!("stamp albums {from} and {to}"))?;

    Ok(TransferOutcome::Moved {
        from_budget,
        to_budget,
    })
}

/// Move budget between two albums in a retried read-write transaction.
///
/// Aborts caused by concurrent writers are absorbed by re-running the
/// transaction; any other failure rolls back every write of the attempt.
pub async fn transfer_marketing_budget(
    client: &Client,
    transfer: Transfer,
) -> Result<CommitResponse<TransferOutcome>> {
    let response = client
        .read_write_transaction(move |txn| transfer_attempt(txn, &transfer))
        .await
        .context(|| format!("transfer from {} to {}", transfer.from, transfer.to));

    let response = match response {
        Ok(response) => response,
        Err(err) => {
            record_transfer("failed");
            return Err(err);
        }
    };

    record_transfer(response.value.label());
    match (&response.value, response.commit_timestamp) {
        (TransferOutcome::Moved { .. }, Some(commit_timestamp)) => {
            tracing::info!(
                amount = transfer.amount,
                from = %transfer.from,
                to = %transfer.to,
                %commit_timestamp,
                "Moved {} from album {}'s marketing budget to album {}'s",
                transfer.amount,
                transfer.from,
                transfer.to
            );
        }
        (outcome, _) => {
            tracing::debug!(?outcome, from = %transfer.from, "Transfer skipped");
        }
    }
    Ok(response)
}
