//! Customer lookups: profile, cases and loyalty membership.
//!
//! Each lookup fills a fixed query template and runs it through
//! [`QueryForwarder::execute_query`]. Only values that passed the checks
//! below are ever interpolated, so the templates cannot be escaped.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::errors::{BrokerError, BrokerResult};
use crate::query::forwarder::QueryForwarder;
use crate::query::normalize::QueryResult;
use crate::sources::exchange::ExchangeTokens;

pub const CASES_LIMIT_DEFAULT: u32 = 5;
pub const CASES_LIMIT_MAX: u32 = 50;
const RELATED_LIMIT: u32 = 3;
const TRANSACTION_HISTORY_LIMIT: u32 = 10;
const HIGH_PRIORITIES: [&str; 2] = ["High", "Critical"];

static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").expect("email pattern")
});

static STATUS_FILTER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9 _-]{1,40}$").expect("status filter pattern")
});

static RECORD_ID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9]{1,18}$").expect("record id pattern")
});

pub type Record = Map<String, Value>;

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct RelatedData {
    pub cases: Vec<Record>,
    pub opportunities: Vec<Record>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct UserProfile {
    pub profile: Option<Record>,
    pub related_data: Option<RelatedData>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CaseList {
    pub cases: Vec<Record>,
    pub total_count: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LoyaltyInfo {
    /// empty when the address has no membership
    pub loyalty_info: Record,
    pub transaction_history: Option<Vec<Record>>,
}

/// Lowercased address, or a validation error.
pub fn normalize_email(email: &str) -> BrokerResult<String> {
    let email = email.trim();
    if !EMAIL.is_match(email) {
        return Err(BrokerError::Validation("invalid email format".into()));
    }
    Ok(email.to_lowercase())
}

fn validate_status_filter(status: &str) -> BrokerResult<()> {
    if !STATUS_FILTER.is_match(status) {
        return Err(BrokerError::Validation(format!("invalid status filter '{}'", status)));
    }
    Ok(())
}

impl<E: ExchangeTokens> QueryForwarder<E> {
    /// Profile of the individual with `email`, plus their latest cases and
    /// opportunities when `include_related_data` is set.
    pub async fn get_user_profile(&self, email: &str, include_related_data: bool) -> BrokerResult<UserProfile> {
        let email = normalize_email(email)?;
        let sql = format!(
            "SELECT Id, FirstName__c, LastName__c, Email__c, Phone__c, Company__c, Title__c, \
             CreatedDate, LastModifiedDate FROM UnifiedIndividual__dlm WHERE Email__c = '{}' LIMIT 1",
            email
        );
        let profile = self.execute_query(&sql).await?.records.into_iter().next();
        let Some(profile) = profile else {
            warn!(email = %email, "user profile not found");
            return Ok(UserProfile { profile: None, related_data: None });
        };

        let related_data = if include_related_data {
            Some(self.related_data(&email).await)
        } else {
            None
        };
        info!(email = %email, has_related_data = related_data.is_some(), "user profile retrieved");
        Ok(UserProfile { profile: Some(profile), related_data })
    }

    /// Newest cases first, optionally restricted to one status.
    pub async fn get_user_cases(
        &self,
        email: &str,
        status_filter: Option<&str>,
        limit: u32,
        include_case_details: bool,
    ) -> BrokerResult<CaseList> {
        let email = normalize_email(email)?;
        if limit == 0 || limit > CASES_LIMIT_MAX {
            return Err(BrokerError::Validation(format!(
                "limit must be between 1 and {}",
                CASES_LIMIT_MAX
            )));
        }

        let mut sql = format!(
            "SELECT Id, CaseNumber, Subject, Status, Priority, CreatedDate, LastModifiedDate, Description \
             FROM Case__dlm WHERE Contact.Email = '{}'",
            email
        );
        if let Some(status) = status_filter {
            validate_status_filter(status)?;
            sql.push_str(&format!(" AND Status = '{}'", status));
        }
        sql.push_str(&format!(" ORDER BY CreatedDate DESC LIMIT {}", limit));

        let mut cases = self.execute_query(&sql).await?.records;
        if include_case_details {
            enrich_cases(&mut cases, Utc::now());
        }
        info!(email = %email, case_count = cases.len(), "user cases retrieved");
        Ok(CaseList { total_count: cases.len(), cases })
    }

    pub async fn get_loyalty_info(&self, email: &str, include_transaction_history: bool) -> BrokerResult<LoyaltyInfo> {
        let email = normalize_email(email)?;
        let sql = format!(
            "SELECT Id, Tier__c, PointsBalance__c, MemberSince__c, NextTierThreshold__c, \
             LastTransactionDate__c FROM LoyaltyMember__dmo WHERE Email__c = '{}' LIMIT 1",
            email
        );
        let loyalty_info = self
            .execute_query(&sql)
            .await?
            .records
            .into_iter()
            .next()
            .unwrap_or_default();

        let member_id = loyalty_info.get("Id").and_then(Value::as_str);
        let transaction_history = match member_id {
            Some(id) if include_transaction_history => Some(self.transaction_history(id).await),
            _ => None,
        };
        info!(
            email = %email,
            has_transaction_history = transaction_history.is_some(),
            "loyalty information retrieved"
        );
        Ok(LoyaltyInfo { loyalty_info, transaction_history })
    }

    /// Both lookups run concurrently; a failed one yields an empty list.
    async fn related_data(&self, email: &str) -> RelatedData {
        let cases_sql = format!(
            "SELECT CaseNumber, Subject, Status, Priority FROM Case__dlm \
             WHERE Contact.Email = '{}' ORDER BY CreatedDate DESC LIMIT {}",
            email, RELATED_LIMIT
        );
        let opportunities_sql = format!(
            "SELECT Name, Amount, StageName, CloseDate FROM Opportunity__dlm \
             WHERE Contact.Email = '{}' ORDER BY CreatedDate DESC LIMIT {}",
            email, RELATED_LIMIT
        );
        let (cases, opportunities) =
            tokio::join!(self.execute_query(&cases_sql), self.execute_query(&opportunities_sql));

        RelatedData {
            cases: records_or_empty("related cases", cases),
            opportunities: records_or_empty("related opportunities", opportunities),
        }
    }

    async fn transaction_history(&self, member_id: &str) -> Vec<Record> {
        if !RECORD_ID.is_match(member_id) {
            warn!(member_id, "unexpected loyalty member id, skipping transaction history");
            return Vec::new();
        }
        let sql = format!(
            "SELECT TransactionDate__c, PointsEarned__c, TransactionType__c, Description__c \
             FROM LoyaltyTransaction__dmo WHERE LoyaltyMember__c = '{}' \
             ORDER BY TransactionDate__c DESC LIMIT {}",
            member_id, TRANSACTION_HISTORY_LIMIT
        );
        records_or_empty("transaction history", self.execute_query(&sql).await)
    }
}

fn records_or_empty(what: &str, result: BrokerResult<QueryResult>) -> Vec<Record> {
    match result {
        Ok(result) => result.records,
        Err(e) => {
            warn!("cannot load {}: {}", what, e);
            Vec::new()
        }
    }
}

/// Adds `DaysOpen` and `IsHighPriority` to every case.
fn enrich_cases(cases: &mut [Record], now: DateTime<Utc>) {
    for case in cases.iter_mut() {
        let days_open = case
            .get("CreatedDate")
            .and_then(Value::as_str)
            .and_then(|created| days_open(created, now));
        let high_priority = case
            .get("Priority")
            .and_then(Value::as_str)
            .is_some_and(|p| HIGH_PRIORITIES.contains(&p));
        case.insert("DaysOpen".into(), days_open.map_or(Value::Null, Value::from));
        case.insert("IsHighPriority".into(), Value::Bool(high_priority));
    }
}

/// Whole days between `created` and `now`. Accepts RFC 3339 and the
/// `2024-01-15T10:30:00.000+0000` form the platform emits.
fn days_open(created: &str, now: DateTime<Utc>) -> Option<i64> {
    let created = DateTime::parse_from_rfc3339(created)
        .or_else(|_| DateTime::parse_from_str(created, "%Y-%m-%dT%H:%M:%S%.f%z"))
        .map(|ts| ts.with_timezone(&Utc))
        .or_else(|_| {
            NaiveDateTime::parse_from_str(created, "%Y-%m-%dT%H:%M:%S%.f").map(|ts| ts.and_utc())
        })
        .ok()?;
    Some((now - created).num_days())
}
