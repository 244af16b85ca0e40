use crate::command::{parse, Command, DeleteScope};
use crate::config::Mode;
use crate::db::{LuckRecord, StoreError};
use crate::domain::luck::{LuckService, StealOutcome, DEFAULT_LEADERBOARD_SIZE};

pub const FAILURE_REPLY: &str = "运势服务暂时出错了，请稍后再试~";

#[derive(Debug, Clone, Copy)]
pub struct DispatchSettings {
    pub mode: Mode,
    pub leaderboard_size: usize,
    pub allow_delete: bool,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        DispatchSettings {
            mode: Mode::Advanced,
            leaderboard_size: DEFAULT_LEADERBOARD_SIZE,
            allow_delete: false,
        }
    }
}

/// Turns chat lines into luck operations and plain-text replies.
#[derive(Clone)]
pub struct Dispatcher {
    service: LuckService,
    settings: DispatchSettings,
}

impl Dispatcher {
    pub fn new(service: LuckService, settings: DispatchSettings) -> Self {
        Dispatcher { service, settings }
    }

    /// Reply for `message` sent by `user_id`, or `None` when the bot stays silent.
    pub async fn handle(&self, user_id: &str, message: &str) -> Option<String> {
        let command = parse(message)?;
        if !self.is_enabled(&command) {
            return None;
        }

        match self.execute(user_id, command).await {
            Ok(reply) => Some(reply),
            Err(e) => {
                tracing::error!(user_id, error = ?e, "Luck command failed");
                Some(FAILURE_REPLY.to_string())
            }
        }
    }

    fn is_enabled(&self, command: &Command) -> bool {
        match command {
            Command::Leaderboard | Command::Steal { .. } => self.settings.mode == Mode::Advanced,
            Command::Delete { .. } => self.settings.allow_delete,
            Command::Help | Command::Show | Command::History => true,
        }
    }

    async fn execute(&self, user_id: &str, command: Command) -> Result<String, StoreError> {
        let mode = self.settings.mode;
        let reply = match command {
            Command::Help => help_text(&self.settings),
            Command::Show => format_today(&self.service.show_today(user_id).await?, mode),
            Command::History => format_history(&self.service.history(user_id).await?, mode),
            Command::Leaderboard => {
                let today = self.service.today();
                let rows = self.service.leaderboard(&today, self.settings.leaderboard_size).await?;
                format_leaderboard(&rows)
            }
            Command::Steal { target: None } => "用法：/rp偷 @某人".to_string(),
            Command::Steal { target: Some(target) } => {
                let outcome = self.service.steal(user_id, &target).await?;
                format_steal(&target, &outcome)
            }
            Command::Delete { scope: None } => {
                "用法：\n/rp删除 today  （删除今天的运势）\n/rp删除 all    （删除全部运势）".to_string()
            }
            Command::Delete { scope: Some(DeleteScope::Today) } => {
                if self.service.clear_today(user_id).await? {
                    "已删除你今天的运势记录".to_string()
                } else {
                    "你今天还没有运势记录，无需删除".to_string()
                }
            }
            Command::Delete { scope: Some(DeleteScope::All) } => {
                let count = self.service.clear_all(user_id).await?;
                format!("已删除你全部 {} 条运势记录", count)
            }
        };
        Ok(reply)
    }
}

pub fn help_text(settings: &DispatchSettings) -> String {
    let mut lines = vec![
        "【rp命令帮助】",
        "/rp                          查看/生成今天的运势",
        "/rp记录 (rp-history)         查看你全部历史运势",
    ];
    if settings.mode == Mode::Advanced {
        lines.push("/rp排行榜 (rp-leaderboard)   今日运势排行榜");
        lines.push("/rp偷 @某人 (rp-steal)       偷取对方运势(每日一次)");
    }
    if settings.allow_delete {
        lines.push("/rp删除 today|all (rp-delete) 删除今天/全部运势");
    }
    lines.push("/rp帮助 (rp-help)            显示本帮助");
    lines.join("\n")
}

pub fn format_today(record: &LuckRecord, mode: Mode) -> String {
    match mode {
        Mode::Basic => format!("今日人品（RP）值：{}", record.luck_value),
        Mode::Advanced => format!(
            "今日人品（RP）值：{}\n今日签：{}\n幸运色：{}\n宜：{}；忌：{}",
            record.luck_value, record.fortune_text, record.color, record.advice_do, record.advice_dont
        ),
    }
}

pub fn format_history(records: &[LuckRecord], mode: Mode) -> String {
    if records.is_empty() {
        return "你还没有任何运势记录~".to_string();
    }

    let mut lines = vec!["【你的运势记录（由近到远）】".to_string()];
    lines.extend(records.iter().map(|r| match mode {
        Mode::Basic => format!("{} => {}", r.date, r.luck_value),
        Mode::Advanced => format!(
            "{} => {} ({},{} | 宜:{}, 忌:{})",
            r.date, r.luck_value, r.fortune_text, r.color, r.advice_do, r.advice_dont
        ),
    }));
    lines.join("\n")
}

pub fn format_leaderboard(records: &[LuckRecord]) -> String {
    if records.is_empty() {
        return "今天还没有任何运势记录哦~".to_string();
    }

    let mut lines = vec!["【今日运势排行榜】".to_string()];
    lines.extend(records.iter().enumerate().map(|(i, r)| {
        format!("{}. 用户 {} => {} ({}, {})", i + 1, r.user_id, r.luck_value, r.fortune_text, r.color)
    }));
    lines.join("\n")
}

pub fn format_steal(target_id: &str, outcome: &StealOutcome) -> String {
    match outcome {
        StealOutcome::SelfTargetRejected => "你不能偷自己哦~".to_string(),
        StealOutcome::StealerHasNoRecord => "你今天还没有运势，先用 /rp 抽取吧！".to_string(),
        StealOutcome::TargetHasNoRecord => "对方今天还没抽运势，暂时偷不到任何东西~".to_string(),
        StealOutcome::AlreadyStolenToday => "你今天已经偷过别人了，每日只能偷一次~".to_string(),
        StealOutcome::TargetDepleted => "对方的运势已经见底，偷不到什么了…".to_string(),
        StealOutcome::Success(r) => format!(
            "你成功从 {} 身上偷取了 {} 点运势！\n你的运势：{} => {}\n对方运势：{} => {}",
            target_id, r.transfer, r.stealer_before, r.stealer_after, r.target_before, r.target_after
        ),
    }
}
