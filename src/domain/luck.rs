use crate::clock::Clock;
use crate::db::{self, DbPool, LuckRecord, StoreError};
use crate::domain::fortune::{clamp_luck, generate, rng_from, SeedSource};
use rand::Rng;
use sqlx::SqliteConnection;
use std::sync::Arc;

pub const STEAL_MIN: i64 = 1;
pub const STEAL_MAX: i64 = 10;

pub const DEFAULT_LEADERBOARD_SIZE: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StealReceipt {
    /// Raw draw from `STEAL_MIN..=STEAL_MAX`.
    pub amount: i64,
    /// What actually left the target: `min(amount, target_before)`.
    pub transfer: i64,
    pub stealer_before: i64,
    pub stealer_after: i64,
    pub target_before: i64,
    pub target_after: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StealOutcome {
    SelfTargetRejected,
    StealerHasNoRecord,
    TargetHasNoRecord,
    AlreadyStolenToday,
    TargetDepleted,
    Success(StealReceipt),
}

#[derive(Clone)]
pub struct LuckService {
    pub(crate) pool: DbPool,
    clock: Arc<dyn Clock>,
    seeds: Arc<dyn SeedSource>,
}

impl LuckService {
    pub fn new(pool: DbPool, clock: Arc<dyn Clock>, seeds: Arc<dyn SeedSource>) -> Self {
        LuckService { pool, clock, seeds }
    }

    pub fn today(&self) -> String {
        self.clock.today()
    }

    /// Today's record for `user_id`, drawing and storing one on first call.
    pub async fn show_today(&self, user_id: &str) -> Result<LuckRecord, StoreError> {
        let today = self.today();
        let mut conn = self.pool.acquire().await?;
        if let Some(record) = db::get_record(&mut conn, user_id, &today).await? {
            return Ok(record);
        }

        let fortune = generate(&mut rng_from(self.seeds.as_ref()));
        match db::insert_record(&mut conn, user_id, &today, &fortune).await {
            Ok(record) => {
                tracing::info!(user_id, date = %today, luck_value = record.luck_value, omen = %fortune.omen, "Drew daily luck");
                Ok(record)
            }
            Err(StoreError::DuplicateKey { .. }) => {
                // Lost the race to a concurrent first request; theirs is the record of the day.
                tracing::debug!(user_id, date = %today, "Record created concurrently, re-reading");
                db::get_record(&mut conn, user_id, &today)
                    .await?
                    .ok_or_else(|| StoreError::Database(sqlx::Error::RowNotFound))
            }
            Err(e) => Err(e),
        }
    }

    pub async fn history(&self, user_id: &str) -> Result<Vec<LuckRecord>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        db::list_by_user(&mut conn, user_id).await
    }

    pub async fn clear_today(&self, user_id: &str) -> Result<bool, StoreError> {
        let today = self.today();
        let mut conn = self.pool.acquire().await?;
        let removed = db::delete_record(&mut conn, user_id, &today).await?;
        if removed {
            tracing::info!(user_id, date = %today, "Deleted today's record");
        }
        Ok(removed)
    }

    pub async fn clear_all(&self, user_id: &str) -> Result<u64, StoreError> {
        let mut conn = self.pool.acquire().await?;
        let count = db::delete_all(&mut conn, user_id).await?;
        tracing::info!(user_id, count, "Deleted all records");
        Ok(count)
    }

    pub async fn leaderboard(&self, date: &str, limit: usize) -> Result<Vec<LuckRecord>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        let mut rows = db::rank_for_date(&mut conn, date).await?;
        rows.truncate(limit);
        Ok(rows)
    }

    /// Moves 1..=10 points from `target_id` to `stealer_id`, at most once per stealer per day.
    ///
    /// Validation, both balance updates and the log entry run in one immediate
    /// transaction: either all of them land or none do, and concurrent steals
    /// against the same target queue behind each other.
    pub async fn steal(&self, stealer_id: &str, target_id: &str) -> Result<StealOutcome, StoreError> {
        if stealer_id == target_id {
            return Ok(StealOutcome::SelfTargetRejected);
        }

        let today = self.today();
        let mut tx = db::ImmediateTx::begin(&self.pool).await?;

        let result = self.steal_locked(tx.conn()?, stealer_id, target_id, &today).await;
        let outcome = match result {
            Ok(outcome) => outcome,
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::debug!(error = ?rollback, "Rollback after failed steal also failed");
                }
                return Err(e);
            }
        };
        match outcome {
            StealOutcome::Success(_) => tx.commit().await?,
            _ => tx.rollback().await?,
        }

        match &outcome {
            StealOutcome::Success(receipt) => tracing::info!(
                stealer_id,
                target_id,
                date = %today,
                transfer = receipt.transfer,
                stealer_after = receipt.stealer_after,
                target_after = receipt.target_after,
                "Steal succeeded"
            ),
            rejected => tracing::debug!(stealer_id, target_id, outcome = ?rejected, "Steal rejected"),
        }
        Ok(outcome)
    }

    async fn steal_locked(
        &self,
        conn: &mut SqliteConnection,
        stealer_id: &str,
        target_id: &str,
        today: &str,
    ) -> Result<StealOutcome, StoreError> {
        let Some(stealer) = db::get_record(conn, stealer_id, today).await? else {
            return Ok(StealOutcome::StealerHasNoRecord);
        };
        let Some(target) = db::get_record(conn, target_id, today).await? else {
            return Ok(StealOutcome::TargetHasNoRecord);
        };
        if db::has_stolen(conn, stealer_id, today).await? {
            return Ok(StealOutcome::AlreadyStolenToday);
        }
        if target.luck_value <= 0 {
            return Ok(StealOutcome::TargetDepleted);
        }

        let amount = rng_from(self.seeds.as_ref()).gen_range(STEAL_MIN..=STEAL_MAX);
        let transfer = amount.min(target.luck_value);
        let target_after = clamp_luck(target.luck_value - transfer);
        // 100 is a hard ceiling; points above it are lost.
        let stealer_after = clamp_luck(stealer.luck_value + transfer);

        db::update_value(conn, target_id, today, target_after).await?;
        db::update_value(conn, stealer_id, today, stealer_after).await?;
        db::record_steal(conn, stealer_id, target_id, today).await?;

        Ok(StealOutcome::Success(StealReceipt {
            amount,
            transfer,
            stealer_before: stealer.luck_value,
            stealer_after,
            target_before: target.luck_value,
            target_after,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::db::init_db;
    use crate::domain::fortune::{EntropySeed, FixedSeed, Fortune, Omen};
    use anyhow::Result;
    use std::future::Future;
    use std::task::Poll;

    const DAY: &str = "2026-01-28";

    async fn service_on(date: &str) -> Result<LuckService> {
        let pool = init_db(":memory:").await?;
        Ok(LuckService::new(pool, Arc::new(FixedClock::new(date)), Arc::new(EntropySeed)))
    }

    async fn seed_value(service: &LuckService, user_id: &str, value: i64) -> Result<()> {
        let fortune = Fortune {
            luck_value: value,
            omen: Omen::Luck,
            color: "蓝色",
            advice_do: "搞副业",
            advice_dont: "迟到",
        };
        let mut conn = service.pool.acquire().await?;
        db::insert_record(&mut conn, user_id, &service.today(), &fortune).await?;
        Ok(())
    }

    async fn value_of(service: &LuckService, user_id: &str) -> Result<i64> {
        let mut conn = service.pool.acquire().await?;
        Ok(db::get_record(&mut conn, user_id, &service.today())
            .await?
            .map(|r| r.luck_value)
            .unwrap_or(-1))
    }

    #[tokio::test]
    async fn test_show_today_is_idempotent() -> Result<()> {
        let service = service_on(DAY).await?;

        let first = service.show_today("alice").await?;
        assert!((0..=100).contains(&first.luck_value));
        assert!(first.fortune_text.parse::<Omen>().is_ok());
        assert_eq!(first.date, DAY);

        for _ in 0..5 {
            assert_eq!(service.show_today("alice").await?, first);
        }
        assert_eq!(service.history("alice").await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_show_today_keeps_existing_record() -> Result<()> {
        let service = service_on(DAY).await?;
        seed_value(&service, "alice", 33).await?;

        let record = service.show_today("alice").await?;
        assert_eq!(record.luck_value, 33);
        assert_eq!(record.color, "蓝色");
        Ok(())
    }

    #[tokio::test]
    async fn test_new_day_draws_new_record() -> Result<()> {
        let pool = init_db(":memory:").await?;
        let monday = LuckService::new(pool.clone(), Arc::new(FixedClock::new("2026-01-26")), Arc::new(FixedSeed(7)));
        let tuesday = LuckService::new(pool, Arc::new(FixedClock::new("2026-01-27")), Arc::new(FixedSeed(7)));

        monday.show_today("alice").await?;
        tuesday.show_today("alice").await?;

        let dates: Vec<String> = tuesday.history("alice").await?.into_iter().map(|r| r.date).collect();
        assert_eq!(dates, vec!["2026-01-27", "2026-01-26"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_clear_today_and_all() -> Result<()> {
        let pool = init_db(":memory:").await?;
        let yesterday = LuckService::new(pool.clone(), Arc::new(FixedClock::new("2026-01-27")), Arc::new(EntropySeed));
        let service = LuckService::new(pool, Arc::new(FixedClock::new(DAY)), Arc::new(EntropySeed));

        assert!(!service.clear_today("alice").await?);

        yesterday.show_today("alice").await?;
        service.show_today("alice").await?;
        service.show_today("bob").await?;

        assert!(service.clear_today("alice").await?);
        assert!(!service.clear_today("alice").await?);
        assert_eq!(service.history("alice").await?.len(), 1);

        assert_eq!(service.clear_all("alice").await?, 1);
        assert!(service.history("alice").await?.is_empty());
        assert_eq!(service.history("bob").await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_leaderboard_limits_and_orders() -> Result<()> {
        let service = service_on(DAY).await?;
        for (user, value) in [("a", 10), ("b", 90), ("c", 50), ("d", 70), ("e", 20), ("f", 95)] {
            seed_value(&service, user, value).await?;
        }

        let top = service.leaderboard(DAY, DEFAULT_LEADERBOARD_SIZE).await?;
        let values: Vec<i64> = top.iter().map(|r| r.luck_value).collect();
        assert_eq!(values, vec![95, 90, 70, 50, 20]);

        assert!(service.leaderboard("2026-01-01", 5).await?.is_empty());
        assert_eq!(service.leaderboard(DAY, 2).await?.len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_steal_rejections() -> Result<()> {
        let service = service_on(DAY).await?;

        assert_eq!(service.steal("alice", "alice").await?, StealOutcome::SelfTargetRejected);
        assert_eq!(service.steal("alice", "bob").await?, StealOutcome::StealerHasNoRecord);

        seed_value(&service, "alice", 40).await?;
        assert_eq!(service.steal("alice", "bob").await?, StealOutcome::TargetHasNoRecord);

        seed_value(&service, "bob", 0).await?;
        assert_eq!(service.steal("alice", "bob").await?, StealOutcome::TargetDepleted);

        // Rejections leave no trace and may be retried.
        let mut conn = service.pool.acquire().await?;
        assert!(!db::has_stolen(&mut conn, "alice", DAY).await?);
        drop(conn);
        assert_eq!(value_of(&service, "alice").await?, 40);
        Ok(())
    }

    #[tokio::test]
    async fn test_steal_moves_points_once_per_day() -> Result<()> {
        let service = service_on(DAY).await?;
        seed_value(&service, "alice", 40).await?;
        seed_value(&service, "bob", 60).await?;
        seed_value(&service, "carol", 60).await?;

        let StealOutcome::Success(receipt) = service.steal("alice", "bob").await? else {
            panic!("expected a successful steal");
        };
        assert!((STEAL_MIN..=STEAL_MAX).contains(&receipt.amount));
        assert_eq!(receipt.transfer, receipt.amount.min(60));
        assert_eq!(receipt.stealer_before, 40);
        assert_eq!(receipt.target_before, 60);
        assert_eq!(receipt.target_after + receipt.transfer, receipt.target_before);
        assert_eq!(receipt.stealer_after, receipt.stealer_before + receipt.transfer);

        assert_eq!(value_of(&service, "alice").await?, receipt.stealer_after);
        assert_eq!(value_of(&service, "bob").await?, receipt.target_after);

        assert_eq!(service.steal("alice", "bob").await?, StealOutcome::AlreadyStolenToday);
        assert_eq!(service.steal("alice", "carol").await?, StealOutcome::AlreadyStolenToday);
        assert_eq!(value_of(&service, "carol").await?, 60);
        Ok(())
    }

    #[tokio::test]
    async fn test_steal_transfer_capped_by_target_balance() -> Result<()> {
        let service = service_on(DAY).await?;
        seed_value(&service, "alice", 10).await?;
        seed_value(&service, "bob", 1).await?;

        let StealOutcome::Success(receipt) = service.steal("alice", "bob").await? else {
            panic!("expected a successful steal");
        };
        assert_eq!(receipt.transfer, 1);
        assert_eq!(receipt.target_after, 0);
        assert_eq!(receipt.stealer_after, 11);
        Ok(())
    }

    #[tokio::test]
    async fn test_steal_never_exceeds_ceiling() -> Result<()> {
        let service = service_on(DAY).await?;
        seed_value(&service, "alice", 100).await?;
        seed_value(&service, "bob", 50).await?;

        let StealOutcome::Success(receipt) = service.steal("alice", "bob").await? else {
            panic!("expected a successful steal");
        };
        assert_eq!(receipt.stealer_after, 100);
        assert_eq!(value_of(&service, "alice").await?, 100);
        assert_eq!(value_of(&service, "bob").await?, 50 - receipt.transfer);
        Ok(())
    }

    #[tokio::test]
    async fn test_many_stealers_one_target() -> Result<()> {
        let service = service_on(DAY).await?;
        seed_value(&service, "target", 100).await?;
        let mut taken = 0;
        for i in 0..5 {
            let thief = format!("thief{i}");
            seed_value(&service, &thief, 0).await?;
            match service.steal(&thief, "target").await? {
                StealOutcome::Success(receipt) => taken += receipt.transfer,
                other => panic!("unexpected outcome {other:?}"),
            }
        }
        assert_eq!(value_of(&service, "target").await?, 100 - taken);
        Ok(())
    }

    #[tokio::test]
    async fn test_steal_limit_resets_next_day() -> Result<()> {
        let pool = init_db(":memory:").await?;
        for date in ["2026-01-27", "2026-01-28"] {
            let service = LuckService::new(pool.clone(), Arc::new(FixedClock::new(date)), Arc::new(EntropySeed));
            seed_value(&service, "alice", 30).await?;
            seed_value(&service, "bob", 30).await?;
            assert!(matches!(service.steal("alice", "bob").await?, StealOutcome::Success(_)));
        }
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_steals_serialize() -> Result<()> {
        let dir = std::env::temp_dir().join(format!("daily-luck-steal-{}", std::process::id()));
        let path = dir.join("luck.db").to_string_lossy().to_string();
        let pool = init_db(&path).await?;
        let service = LuckService::new(pool.clone(), Arc::new(FixedClock::new(DAY)), Arc::new(EntropySeed));

        seed_value(&service, "target", 100).await?;
        for i in 0..5 {
            seed_value(&service, &format!("thief{i}"), 0).await?;
        }

        let mut tasks = tokio::task::JoinSet::new();
        for i in 0..5 {
            let service = service.clone();
            tasks.spawn(async move { service.steal(&format!("thief{i}"), "target").await });
        }

        let mut taken = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined?? {
                StealOutcome::Success(receipt) => taken += receipt.transfer,
                other => panic!("unexpected outcome {other:?}"),
            }
        }
        assert_eq!(value_of(&service, "target").await?, 100 - taken);

        pool.close().await;
        std::fs::remove_dir_all(&dir)?;
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_draw_stores_one_record() -> Result<()> {
        let dir = std::env::temp_dir().join(format!("daily-luck-show-{}", std::process::id()));
        let path = dir.join("luck.db").to_string_lossy().to_string();
        let pool = init_db(&path).await?;
        let service = LuckService::new(pool.clone(), Arc::new(FixedClock::new(DAY)), Arc::new(EntropySeed));

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let service = service.clone();
            tasks.spawn(async move { service.show_today("alice").await });
        }

        let mut records = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            records.push(joined??);
        }
        assert!(records.iter().all(|r| *r == records[0]));
        assert_eq!(service.history("alice").await?, vec![records[0].clone()]);

        pool.close().await;
        std::fs::remove_dir_all(&dir)?;
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_steal_log_leaves_balances_untouched() -> Result<()> {
        let service = service_on(DAY).await?;
        seed_value(&service, "alice", 10).await?;
        seed_value(&service, "bob", 60).await?;
        sqlx::query(
            "CREATE TRIGGER fail_steal_log BEFORE INSERT ON luck_steals \
             BEGIN SELECT RAISE(ABORT, 'steal log offline'); END",
        )
        .execute(&mut *service.pool.acquire().await?)
        .await?;

        assert!(service.steal("alice", "bob").await.is_err());

        assert_eq!(value_of(&service, "alice").await?, 10);
        assert_eq!(value_of(&service, "bob").await?, 60);
        let mut conn = service.pool.acquire().await?;
        assert!(!db::has_stolen(&mut conn, "alice", DAY).await?);
        Ok(())
    }

    /// Polls `fut` up to `polls` times, then drops it wherever it stopped.
    async fn poll_then_drop<F: Future>(fut: F, polls: usize) {
        let mut fut = std::pin::pin!(fut);
        for _ in 0..polls {
            let ready = std::future::poll_fn(|cx| Poll::Ready(fut.as_mut().poll(cx).is_ready())).await;
            if ready {
                return;
            }
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_cancelled_steal_is_all_or_nothing() -> Result<()> {
        let service = service_on(DAY).await?;

        for polls in 1..=20 {
            let stealer = format!("stealer{polls}");
            let target = format!("target{polls}");
            seed_value(&service, &stealer, 0).await?;
            seed_value(&service, &target, 50).await?;

            poll_then_drop(service.steal(&stealer, &target), polls).await;

            // The pool's only connection must be usable and outside any transaction.
            let mut conn = service.pool.acquire().await?;
            sqlx::query("BEGIN").execute(&mut *conn).await?;
            sqlx::query("ROLLBACK").execute(&mut *conn).await?;
            let stolen = db::has_stolen(&mut conn, &stealer, DAY).await?;
            drop(conn);

            let gained = value_of(&service, &stealer).await?;
            let left = value_of(&service, &target).await?;
            assert_eq!(gained + left, 50, "after {polls} polls");
            assert_eq!(stolen, gained > 0, "after {polls} polls");
        }
        Ok(())
    }
}
