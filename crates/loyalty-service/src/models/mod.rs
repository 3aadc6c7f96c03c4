//! 积分服务领域模型

pub mod customer;
pub mod enums;
pub mod ledger;
pub mod membership;
pub mod notification;
pub mod program;
pub mod reward;

pub use customer::Customer;
pub use enums::{
    ActionType, BillingCycle, MembershipStatus, MessageType, PeriodType, RedemptionStatus,
    ReferenceType, RewardType, Tier, TransactionType,
};
pub use ledger::{
    AppendGuard, Balance, LedgerTotals, LedgerTransaction, NewTransaction, ReconcileReport,
    expiry_due, replay,
};
pub use membership::{
    Membership, MembershipPlan, MembershipSweepReport, NewMembership, NewMembershipPlan,
};
pub use notification::{NotificationLogEntry, REACTIVATION_DEDUP_KEY, dedup_key, reminder_dedup_key};
pub use program::{NewProgram, Program, TokenRule, clamp_to_cap, select_rule};
pub use reward::{
    NewReward, Redemption, RedemptionReceipt, Reward, generate_redemption_code,
};
