//! Statistics Aggregation Engine
//!
//! Point-in-time counts and per-day rollups over the repository. Nothing here
//! is cached. Every status breakdown comes from a single status-grouped
//! aggregate, so `pending + approved + rejected == total` holds per scope.

use std::collections::BTreeMap;
use std::sync::Arc;

use alpaca_core::{
    AlpacaConfig, GroupField, RecordFilter, TimeRange, UserAccount, UserId, UserQuery,
};
use alpaca_storage::InstructionRepository;
use chrono::{Days, NaiveDate, NaiveTime, Utc};

use crate::constants::{DEFAULT_USER_PAGE_SIZE, MAX_USER_PAGE_SIZE};
use crate::context::RequestContext;
use crate::error::{ServiceError, ServiceResult};
use crate::types::{
    DailyStatistic, GlobalStatistic, StatisticsWindow, StatusBreakdown, UserStatistic,
    UserStatisticList, UserStatisticListRequest,
};
use crate::validation::ValidatePage;

/// Resolve a possibly half-open window into inclusive `(start, end)` dates.
///
/// Both bounds absent gives the `rollup_days` days ending `today`; one bound
/// absent is filled in `rollup_days - 1` days away from the other.
pub fn resolve_window(
    window: StatisticsWindow,
    today: NaiveDate,
    rollup_days: u32,
    max_days: u32,
) -> ServiceResult<(NaiveDate, NaiveDate)> {
    let span = Days::new(u64::from(rollup_days.saturating_sub(1)));
    let out_of_range = || ServiceError::validation_failed("Statistics window is out of range");

    let (start, end) = match (window.start_date, window.end_date) {
        (Some(start), Some(end)) => (start, end),
        (Some(start), None) => (start, start.checked_add_days(span).ok_or_else(out_of_range)?),
        (None, Some(end)) => (end.checked_sub_days(span).ok_or_else(out_of_range)?, end),
        (None, None) => (today.checked_sub_days(span).ok_or_else(out_of_range)?, today),
    };

    if start > end {
        return Err(ServiceError::validation_failed(format!(
            "Window start {} is after end {}",
            start, end
        )));
    }
    let days = (end - start).num_days() + 1;
    if days > i64::from(max_days) {
        return Err(ServiceError::validation_failed(format!(
            "Window of {} days exceeds the maximum of {}",
            days, max_days
        )));
    }
    Ok((start, end))
}

/// The UTC calendar day `[00:00, next 00:00)`.
fn day_range(day: NaiveDate) -> ServiceResult<TimeRange> {
    let next = day
        .checked_add_days(Days::new(1))
        .ok_or_else(|| ServiceError::validation_failed("Statistics window is out of range"))?;
    Ok(TimeRange::between(
        day.and_time(NaiveTime::MIN).and_utc(),
        next.and_time(NaiveTime::MIN).and_utc(),
    ))
}

/// Administrator statistics over instruction records.
#[derive(Clone)]
pub struct StatisticsService {
    repo: InstructionRepository,
    config: Arc<AlpacaConfig>,
}

impl StatisticsService {
    pub fn new(repo: InstructionRepository, config: Arc<AlpacaConfig>) -> Self {
        Self { repo, config }
    }

    async fn breakdown(
        &self,
        ctx: &RequestContext,
        filter: &RecordFilter,
    ) -> ServiceResult<StatusBreakdown> {
        let counts = ctx
            .run(
                "aggregate_status",
                self.config.operation_timeout,
                self.repo.aggregate_count(GroupField::StatusCode, filter),
            )
            .await?;
        Ok(StatusBreakdown::from_aggregate(&counts))
    }

    async fn themes(
        &self,
        ctx: &RequestContext,
        filter: &RecordFilter,
    ) -> ServiceResult<BTreeMap<String, u64>> {
        ctx.run(
            "aggregate_theme",
            self.config.operation_timeout,
            self.repo.aggregate_count(GroupField::Theme, filter),
        )
        .await
    }

    /// All-time counts plus one rollup entry per day of the window.
    pub async fn get_global_statistic(
        &self,
        ctx: &RequestContext,
        window: StatisticsWindow,
    ) -> ServiceResult<GlobalStatistic> {
        ctx.require_admin()?;
        let (start, end) = resolve_window(
            window,
            Utc::now().date_naive(),
            self.config.rollup_days,
            self.config.max_rollup_days,
        )?;

        let everything = RecordFilter::default();
        let counts = self.breakdown(ctx, &everything).await?;
        let theme_count = self.themes(ctx, &everything).await?;

        let mut daily = Vec::new();
        for date in start.iter_days().take_while(|d| *d <= end) {
            let filter = RecordFilter::default().with_created(day_range(date)?);
            daily.push(DailyStatistic {
                date,
                counts: self.breakdown(ctx, &filter).await?,
                theme_count: self.themes(ctx, &filter).await?,
            });
        }

        tracing::debug!(%start, %end, total = counts.total, "Global statistic computed");
        Ok(GlobalStatistic {
            counts,
            theme_count,
            daily,
        })
    }

    /// Counts for one user. Administrators may ask about anyone, users only
    /// about themselves.
    pub async fn get_user_statistic(
        &self,
        ctx: &RequestContext,
        user_id: UserId,
    ) -> ServiceResult<UserStatistic> {
        let caller = ctx.require_caller()?;
        if !caller.is_admin() && caller.user_id != user_id {
            return Err(ServiceError::permission_deny(
                "Statistics of other users require the administrator role",
            ));
        }
        let user = ctx
            .run("get_user", self.config.operation_timeout, self.repo.user(user_id))
            .await?;
        self.user_statistic(ctx, user).await
    }

    /// A page of users, each with their counts.
    pub async fn get_user_statistic_list(
        &self,
        ctx: &RequestContext,
        request: UserStatisticListRequest,
    ) -> ServiceResult<UserStatisticList> {
        ctx.require_admin()?;
        let limit = request.limit.unwrap_or(DEFAULT_USER_PAGE_SIZE);
        limit.validate_page_size("limit", MAX_USER_PAGE_SIZE)?;

        let query = UserQuery {
            username_contains: request.username_contains,
            role: request.role,
            offset: request.offset,
            limit,
        };
        let (users, total) = ctx
            .run(
                "list_users",
                self.config.operation_timeout,
                self.repo.list_users(&query),
            )
            .await?;

        let mut items = Vec::with_capacity(users.len());
        for user in users {
            items.push(self.user_statistic(ctx, user).await?);
        }
        Ok(UserStatisticList { items, total })
    }

    async fn user_statistic(
        &self,
        ctx: &RequestContext,
        user: UserAccount,
    ) -> ServiceResult<UserStatistic> {
        let counts = self
            .breakdown(ctx, &RecordFilter::owned_by(user.user_id))
            .await?;
        Ok(UserStatistic {
            user_id: user.user_id,
            username: user.username,
            counts,
        })
    }
}
