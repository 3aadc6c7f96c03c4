//! 生命周期消息模板
//!
//! 每种消息类型有一张固定的变量表，模板中以 `{{var}}` 引用。
//! 变量名不在表内或没有取到值时，占位符原样保留并记录告警，渲染本身不会失败。

use std::collections::HashMap;

use chrono::NaiveDate;
use loyalty::repository::ExpiringMembership;
use loyalty::{Customer, MessageType, Program};
use regex::{Captures, Regex};
use tracing::warn;

/// 模板变量
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateVar {
    CustomerName,
    PlanName,
    EndDate,
    DaysRemaining,
    TenantName,
    MonthsInactive,
    SpecialOffer,
    CurrencyName,
}

impl TemplateVar {
    pub fn name(&self) -> &'static str {
        match self {
            Self::CustomerName => "customer_name",
            Self::PlanName => "plan_name",
            Self::EndDate => "end_date",
            Self::DaysRemaining => "days_remaining",
            Self::TenantName => "tenant_name",
            Self::MonthsInactive => "months_inactive",
            Self::SpecialOffer => "special_offer",
            Self::CurrencyName => "currency_name",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "customer_name" => Some(Self::CustomerName),
            "plan_name" => Some(Self::PlanName),
            "end_date" => Some(Self::EndDate),
            "days_remaining" => Some(Self::DaysRemaining),
            "tenant_name" => Some(Self::TenantName),
            "months_inactive" => Some(Self::MonthsInactive),
            "special_offer" => Some(Self::SpecialOffer),
            "currency_name" => Some(Self::CurrencyName),
            _ => None,
        }
    }
}

const REMINDER_VARS: &[TemplateVar] = &[
    TemplateVar::CustomerName,
    TemplateVar::PlanName,
    TemplateVar::EndDate,
    TemplateVar::DaysRemaining,
    TemplateVar::TenantName,
];

const REACTIVATION_VARS: &[TemplateVar] = &[
    TemplateVar::CustomerName,
    TemplateVar::MonthsInactive,
    TemplateVar::SpecialOffer,
    TemplateVar::TenantName,
    TemplateVar::CurrencyName,
];

/// 消息类型允许使用的变量
pub fn vocabulary(message_type: MessageType) -> &'static [TemplateVar] {
    match message_type {
        MessageType::MembershipReminder => REMINDER_VARS,
        MessageType::Reactivation => REACTIVATION_VARS,
    }
}

const DEFAULT_REMINDER: &str = "Hi {{customer_name}}, your {{plan_name}} membership at {{tenant_name}} \
ends on {{end_date}} ({{days_remaining}} days left). Renew now to keep your benefits!";

const DEFAULT_REACTIVATION: &str = "We miss you at {{tenant_name}}! It has been {{months_inactive}} \
months since your last visit. {{special_offer}}";

/// 到期日在消息中的显示格式
const END_DATE_FORMAT: &str = "%d/%m/%Y";

/// 变量取值
#[derive(Debug, Clone, Default)]
pub struct TemplateVars {
    values: HashMap<TemplateVar, String>,
}

impl TemplateVars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, var: TemplateVar, value: impl ToString) -> Self {
        self.values.insert(var, value.to_string());
        self
    }

    pub fn get(&self, var: TemplateVar) -> Option<&str> {
        self.values.get(&var).map(String::as_str)
    }

    /// 续费提醒的变量
    pub fn membership_reminder(
        program: &Program,
        expiring: &ExpiringMembership,
        today: NaiveDate,
    ) -> Self {
        let end_date = expiring.membership.end_date;
        Self::new()
            .set(TemplateVar::CustomerName, &expiring.customer_name)
            .set(TemplateVar::PlanName, &expiring.plan_name)
            .set(TemplateVar::EndDate, end_date.format(END_DATE_FORMAT))
            .set(
                TemplateVar::DaysRemaining,
                expiring.membership.days_remaining(today),
            )
            .set(TemplateVar::TenantName, &program.tenant_name)
    }

    /// 召回消息的变量
    pub fn reactivation(
        program: &Program,
        customer: &Customer,
        months_inactive: u32,
        special_offer: &str,
    ) -> Self {
        Self::new()
            .set(TemplateVar::CustomerName, &customer.name)
            .set(TemplateVar::MonthsInactive, months_inactive)
            .set(TemplateVar::SpecialOffer, special_offer)
            .set(TemplateVar::TenantName, &program.tenant_name)
            .set(TemplateVar::CurrencyName, &program.currency_name)
    }
}

/// 单个消息模板
#[derive(Debug, Clone)]
pub struct MessageTemplate {
    message_type: MessageType,
    body: String,
}

impl MessageTemplate {
    pub fn new(message_type: MessageType, body: impl Into<String>) -> Self {
        Self {
            message_type,
            body: body.into(),
        }
    }

    pub fn default_for(message_type: MessageType) -> Self {
        let body = match message_type {
            MessageType::MembershipReminder => DEFAULT_REMINDER,
            MessageType::Reactivation => DEFAULT_REACTIVATION,
        };
        Self::new(message_type, body)
    }

    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    pub fn body(&self) -> &str {
        &self.body
    }
}

/// 渲染结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedMessage {
    pub message_type: MessageType,
    pub text: String,
    /// 未能替换、原样保留的变量名
    pub unresolved: Vec<String>,
    /// 模板已引用客户姓名，不再需要 AI 改写
    pub personalized: bool,
}

/// 模板渲染器
///
/// 持有两种消息类型各一个模板，默认使用内置文案
pub struct TemplateRenderer {
    /// 匹配 {{name}} 格式的占位符
    placeholder_regex: Regex,
    reminder: MessageTemplate,
    reactivation: MessageTemplate,
}

impl TemplateRenderer {
    pub fn new() -> Self {
        Self::with_templates(
            MessageTemplate::default_for(MessageType::MembershipReminder),
            MessageTemplate::default_for(MessageType::Reactivation),
        )
    }

    pub fn with_templates(reminder: MessageTemplate, reactivation: MessageTemplate) -> Self {
        Self {
            placeholder_regex: Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").unwrap(),
            reminder,
            reactivation,
        }
    }

    pub fn template(&self, message_type: MessageType) -> &MessageTemplate {
        match message_type {
            MessageType::MembershipReminder => &self.reminder,
            MessageType::Reactivation => &self.reactivation,
        }
    }

    /// 模板是否引用了某个变量
    pub fn references(&self, message_type: MessageType, var: TemplateVar) -> bool {
        self.placeholder_regex
            .captures_iter(self.template(message_type).body())
            .any(|caps| &caps[1] == var.name())
    }

    /// 引用了客户姓名的模板视为已经个性化
    pub fn is_personalized(&self, message_type: MessageType) -> bool {
        self.references(message_type, TemplateVar::CustomerName)
    }

    pub fn render(&self, message_type: MessageType, vars: &TemplateVars) -> RenderedMessage {
        let allowed = vocabulary(message_type);
        let mut unresolved = Vec::new();

        let text = self
            .placeholder_regex
            .replace_all(self.template(message_type).body(), |caps: &Captures| {
                let value = TemplateVar::from_name(&caps[1])
                    .filter(|var| allowed.contains(var))
                    .and_then(|var| vars.get(var));
                match value {
                    Some(value) => value.to_string(),
                    None => {
                        unresolved.push(caps[1].to_string());
                        caps[0].to_string()
                    }
                }
            })
            .into_owned();

        if !unresolved.is_empty() {
            warn!(
                message_type = message_type.as_str(),
                unresolved = ?unresolved,
                "模板变量未能替换，已原样保留"
            );
        }

        RenderedMessage {
            message_type,
            text,
            unresolved,
            personalized: self.is_personalized(message_type),
        }
    }
}

impl Default for TemplateRenderer {
    fn default() -> Self {
        Self::new()
    }
}
