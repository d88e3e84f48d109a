//! 任务与子任务数据模型
//!
//! AutonomousTask 的状态只单调推进（analyzing → executing → verifying → completed/failed），
//! 唯一的回退是 paused → executing（恢复）。子任务进入 completed/failed 后不再修改。

use serde::{Deserialize, Serialize};

use crate::core::AgentError;

/// 子任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubTaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl SubTaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SubTaskStatus::Completed | SubTaskStatus::Failed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubTask {
    pub id: String,
    pub description: String,
    pub status: SubTaskStatus,
    pub result: Option<String>,
    pub error: Option<String>,
    /// 毫秒时间戳
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
    /// 由目标验证追加的补救子任务（不再走两阶段复审）
    #[serde(default)]
    pub is_recovery: bool,
    /// 已完成的执行次数（含复审触发的重做；挂起后恢复的执行只算一次）
    #[serde(default)]
    pub attempts: u32,
    /// 最近一次复审打回的问题，下次执行时作为反馈
    #[serde(default)]
    pub review_feedback: Vec<String>,
}

impl SubTask {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            id: format!("subtask_{}", uuid::Uuid::new_v4().simple()),
            description: description.into(),
            status: SubTaskStatus::Pending,
            result: None,
            error: None,
            started_at: None,
            completed_at: None,
            is_recovery: false,
            attempts: 0,
            review_feedback: Vec::new(),
        }
    }

    pub fn recovery(description: impl Into<String>) -> Self {
        Self {
            is_recovery: true,
            ..Self::new(description)
        }
    }

    pub fn start(&mut self) -> Result<(), AgentError> {
        if self.status.is_terminal() {
            return Err(AgentError::InvalidState(format!(
                "subtask {} already {:?}",
                self.id, self.status
            )));
        }
        self.status = SubTaskStatus::Running;
        self.started_at.get_or_insert_with(now_ms);
        Ok(())
    }

    pub fn complete(&mut self, result: String) -> Result<(), AgentError> {
        self.finish(SubTaskStatus::Completed)?;
        self.result = Some(result);
        Ok(())
    }

    pub fn fail(&mut self, error: String) -> Result<(), AgentError> {
        self.finish(SubTaskStatus::Failed)?;
        self.error = Some(error);
        Ok(())
    }

    /// 挂起时退回 pending，恢复后重新执行
    pub fn requeue(&mut self) {
        if self.status == SubTaskStatus::Running {
            self.status = SubTaskStatus::Pending;
        }
    }

    fn finish(&mut self, status: SubTaskStatus) -> Result<(), AgentError> {
        if self.status.is_terminal() {
            return Err(AgentError::InvalidState(format!(
                "subtask {} already {:?}",
                self.id, self.status
            )));
        }
        self.status = status;
        self.completed_at = Some(now_ms());
        Ok(())
    }

    /// 传给后续子任务的摘要（只含描述与结果，不含完整历史）
    pub fn summary_line(&self) -> String {
        let result = self.result.as_deref().unwrap_or("");
        let short: String = result.chars().take(500).collect();
        format!("{}: {}", self.description, short)
    }
}

/// 任务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Analyzing,
    Executing,
    Verifying,
    Completed,
    Failed,
    Paused,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// 合法迁移：单调推进，只允许 paused → executing 回退；任何非终态都可转 failed
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, next) {
            (Completed, _) | (Failed, _) => false,
            (_, Failed) => true,
            (Analyzing, Executing) => true,
            (Executing, Verifying) | (Executing, Paused) | (Executing, Executing) => true,
            (Paused, Executing) => true,
            (Verifying, Executing) | (Verifying, Completed) => true,
            _ => false,
        }
    }
}

/// 任务分解结果
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Decomposition {
    pub subtasks: Vec<String>,
    #[serde(default)]
    pub strategy: String,
    #[serde(default = "default_true")]
    pub can_run_autonomously: bool,
    /// 非空时任务暂停，等待用户回答这些问题
    #[serde(default)]
    pub requires_user_input: Vec<String>,
}

fn default_true() -> bool {
    true
}

/// 目标验证结果（作为元数据附在任务上，不阻塞完成）
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GoalVerification {
    pub goal_met: bool,
    #[serde(default)]
    pub evidence: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub missing_steps: Vec<String>,
    #[serde(default)]
    pub suggested_next_actions: Vec<String>,
}

/// 从任务中提取的记忆
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryFact {
    pub content: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub confidence: f64,
}

/// 复审阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStage {
    /// 结果是否符合子任务描述
    SpecCompliance,
    /// 实现质量
    Quality,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Critical,
    Major,
    Minor,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewIssue {
    pub severity: IssueSeverity,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewOutcome {
    pub approved: bool,
    #[serde(default)]
    pub issues: Vec<ReviewIssue>,
}

impl ReviewOutcome {
    pub fn approved() -> Self {
        Self {
            approved: true,
            issues: Vec::new(),
        }
    }

    /// 未通过或含 critical 问题时需要整体重做
    pub fn needs_rework(&self) -> bool {
        !self.approved || self.issues.iter().any(|i| i.severity == IssueSeverity::Critical)
    }
}

/// 一个目标对应的任务
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutonomousTask {
    pub id: String,
    pub original_query: String,
    pub subtasks: Vec<SubTask>,
    pub status: TaskStatus,
    pub strategy: String,
    pub can_run_autonomously: bool,
    pub required_user_input: Vec<String>,
    /// 恢复时用户给出的回答
    pub user_answers: Vec<String>,
    pub verification_result: Option<GoalVerification>,
    /// 已按验证建议追加过补救子任务（每个任务只补救一轮）
    #[serde(default)]
    pub recovery_planned: bool,
    pub summary: Option<String>,
    /// 已保存的记忆（None 表示未提取）
    pub memory_extracted: Option<Vec<MemoryFact>>,
    pub auto_save_memory: bool,
    pub error: Option<String>,
    pub created_at: i64,
    pub completed_at: Option<i64>,
}

impl AutonomousTask {
    pub fn new(query: impl Into<String>, auto_save_memory: bool) -> Self {
        Self {
            id: format!("task_{}", uuid::Uuid::new_v4().simple()),
            original_query: query.into(),
            subtasks: Vec::new(),
            status: TaskStatus::Analyzing,
            strategy: String::new(),
            can_run_autonomously: true,
            required_user_input: Vec::new(),
            user_answers: Vec::new(),
            verification_result: None,
            recovery_planned: false,
            summary: None,
            memory_extracted: None,
            auto_save_memory,
            error: None,
            created_at: now_ms(),
            completed_at: None,
        }
    }

    pub fn transition(&mut self, next: TaskStatus) -> Result<(), AgentError> {
        if !self.status.can_transition_to(next) {
            return Err(AgentError::InvalidState(format!(
                "task {}: {:?} -> {:?}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        if next.is_terminal() {
            self.completed_at = Some(now_ms());
        }
        Ok(())
    }

    /// 已完成子任务的摘要（新子任务的唯一上下文）
    pub fn completed_summaries(&self) -> Vec<String> {
        self.subtasks
            .iter()
            .filter(|s| s.status == SubTaskStatus::Completed)
            .map(|s| s.summary_line())
            .collect()
    }

    pub fn goal_met(&self) -> Option<bool> {
        self.verification_result.as_ref().map(|v| v.goal_met)
    }
}

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
