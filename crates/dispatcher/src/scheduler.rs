use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, instrument, warn};

use taskflow_core::{Sweeper, TaskflowError, TaskflowResult};
use taskflow_domain::actions::TaskSchedule;
use taskflow_domain::entities::{ScheduleType, TaskDefinition, TaskType};
use taskflow_domain::registry::TemplateRegistry;
use taskflow_domain::repositories::TaskStore;
use taskflow_infrastructure::StructuredLogger;

use crate::cron_utils::{parse_once_time, CronScheduler};
use crate::task_factory::{NewTask, TaskFactory};

/// 调度前端：扫描启用的任务定义，到期时物化任务图
///
/// 每个定义独立评估，单个定义的错误不会影响其他定义。调度规则无法解析的定义会被禁用。
pub struct TaskScheduler {
    store: Arc<dyn TaskStore>,
    templates: Arc<TemplateRegistry>,
    factory: Arc<TaskFactory>,
}

impl TaskScheduler {
    pub fn new(
        store: Arc<dyn TaskStore>,
        templates: Arc<TemplateRegistry>,
        factory: Arc<TaskFactory>,
    ) -> Self {
        Self {
            store,
            templates,
            factory,
        }
    }

    /// 扫描一轮，返回本轮创建的任务数
    #[instrument(skip(self))]
    pub async fn scan_and_schedule(&self, now: DateTime<Utc>) -> TaskflowResult<usize> {
        let mut created = 0;

        for schedule_type in [ScheduleType::Once, ScheduleType::Cron] {
            let definitions = self.store.find_enabled_definitions(schedule_type).await?;
            for definition in definitions {
                let id = definition.id;
                let name = definition.name.clone();
                match self.evaluate_definition(definition.clone(), now).await {
                    Ok(true) => created += 1,
                    Ok(false) => {}
                    Err(e) if e.is_malformed_schedule() => {
                        self.disable_definition(definition, &e).await;
                    }
                    Err(e) => {
                        error!("评估任务定义 {}({}) 失败: {}", name, id, e);
                    }
                }
            }
        }

        if created > 0 {
            info!("本轮调度创建了 {} 个任务", created);
        }
        Ok(created)
    }

    async fn evaluate_definition(
        &self,
        definition: TaskDefinition,
        now: DateTime<Utc>,
    ) -> TaskflowResult<bool> {
        match definition.schedule_type {
            ScheduleType::Once => self.evaluate_once(definition, now).await,
            ScheduleType::Cron => self.evaluate_cron(definition, now).await,
        }
    }

    async fn evaluate_once(
        &self,
        mut definition: TaskDefinition,
        now: DateTime<Utc>,
    ) -> TaskflowResult<bool> {
        if definition.last_run_time.is_some() {
            return Ok(false);
        }

        let fire_at = parse_once_time(&definition.schedule_rule)?;
        if fire_at > now {
            if definition.next_run_time != Some(fire_at) {
                definition.next_run_time = Some(fire_at);
                self.store.update_definition(&definition).await?;
            }
            return Ok(false);
        }

        let schedule = self.templates.require(&definition.template_name)?;
        if !schedule.ready().await {
            debug!("任务模板 {} 未就绪，跳过定义 {}", definition.template_name, definition.name);
            return Ok(false);
        }

        self.materialize(&definition, schedule.as_ref(), now).await?;
        definition.last_run_time = Some(now);
        definition.next_run_time = None;
        self.store.update_definition(&definition).await?;
        Ok(true)
    }

    async fn evaluate_cron(
        &self,
        mut definition: TaskDefinition,
        now: DateTime<Utc>,
    ) -> TaskflowResult<bool> {
        if !definition.is_within_window(now) {
            return Ok(false);
        }

        let cron = CronScheduler::new(&definition.schedule_rule)?;
        let next_run = match definition.next_run_time {
            Some(next_run) => next_run,
            None => {
                // 首次评估只确定下一次触发时间
                definition.next_run_time = cron.next_execution_time(now);
                self.store.update_definition(&definition).await?;
                return Ok(false);
            }
        };

        if !CronScheduler::is_due(next_run, now) {
            return Ok(false);
        }

        let schedule = self.templates.require(&definition.template_name)?;
        if !schedule.ready().await {
            debug!("任务模板 {} 未就绪，保留本次触发", definition.template_name);
            return Ok(false);
        }

        let result = self.materialize(&definition, schedule.as_ref(), now).await;

        // 无论物化是否成功都推进触发时间，错过的触发不会补发
        definition.last_run_time = Some(now);
        definition.next_run_time = cron.next_execution_time(now);
        self.store.update_definition(&definition).await?;

        result.map(|_| true)
    }

    async fn materialize(
        &self,
        definition: &TaskDefinition,
        schedule: &dyn TaskSchedule,
        now: DateTime<Utc>,
    ) -> TaskflowResult<()> {
        let task_type = if definition.creator == "system" {
            TaskType::SysScheduled
        } else {
            TaskType::Scheduled
        };

        let (task, _) = self
            .factory
            .create_task(NewTask {
                name: format!("{}-{}", definition.name, now.format("%Y%m%d%H%M%S")),
                template: schedule.template(),
                argument: schedule.argument(),
                task_type,
                definition_id: Some(definition.id),
                creator: definition.creator.clone(),
            })
            .await?;

        info!(
            "任务定义 {} 触发，创建任务 {}({})",
            definition.name, task.name, task.id
        );
        Ok(())
    }

    async fn disable_definition(&self, mut definition: TaskDefinition, reason: &TaskflowError) {
        definition.enabled = false;
        match self.store.update_definition(&definition).await {
            Ok(()) => StructuredLogger::log_definition_disabled(
                definition.id,
                &definition.name,
                &reason.to_string(),
            ),
            Err(e) => warn!("禁用任务定义 {} 失败: {}", definition.id, e),
        }
    }
}

#[async_trait]
impl Sweeper for TaskScheduler {
    fn name(&self) -> &'static str {
        "task_scheduler"
    }

    async fn sweep(&self) -> TaskflowResult<usize> {
        self.scan_and_schedule(Utc::now()).await
    }
}
