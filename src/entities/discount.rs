use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Discount code. Immutable catalog entity; only `usage_count` moves, and
/// only at order confirmation.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "discounts")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub code: String,
    pub kind: DiscountKind,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub value: Decimal,
    #[sea_orm(nullable)]
    pub starts_at: Option<DateTime<Utc>>,
    #[sea_orm(nullable)]
    pub ends_at: Option<DateTime<Utc>>,
    #[sea_orm(nullable)]
    pub usage_limit: Option<i32>,
    pub usage_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::cart::Entity")]
    Carts,
}

impl Related<super::cart::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Carts.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
pub enum DiscountKind {
    #[sea_orm(string_value = "percentage")]
    Percentage,
    #[sea_orm(string_value = "fixed_amount")]
    FixedAmount,
}

impl Model {
    /// Whether `now` falls inside the validity window. Boundaries are
    /// inclusive; missing boundaries are open-ended.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        if let Some(starts) = self.starts_at {
            if now < starts {
                return false;
            }
        }
        if let Some(ends) = self.ends_at {
            if now > ends {
                return false;
            }
        }
        true
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self.usage_limit, Some(limit) if self.usage_count >= limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn discount(starts: Option<i64>, ends: Option<i64>) -> Model {
        let now = Utc::now();
        Model {
            id: Uuid::new_v4(),
            code: "WELCOME10".into(),
            kind: DiscountKind::Percentage,
            value: dec!(10),
            starts_at: starts.map(|h| now + Duration::hours(h)),
            ends_at: ends.map(|h| now + Duration::hours(h)),
            usage_limit: None,
            usage_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn window_boundaries_are_inclusive() {
        let now = Utc::now();
        let mut d = discount(None, None);
        d.starts_at = Some(now);
        d.ends_at = Some(now);
        assert!(d.is_active_at(now));
    }

    #[test]
    fn outside_window_is_inactive() {
        assert!(!discount(Some(1), None).is_active_at(Utc::now()));
        assert!(!discount(None, Some(-1)).is_active_at(Utc::now()));
        assert!(discount(Some(-1), Some(1)).is_active_at(Utc::now()));
    }

    #[test]
    fn usage_limit_exhaustion() {
        let mut d = discount(None, None);
        assert!(!d.is_exhausted());
        d.usage_limit = Some(2);
        d.usage_count = 1;
        assert!(!d.is_exhausted());
        d.usage_count = 2;
        assert!(d.is_exhausted());
    }
}
