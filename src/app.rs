use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use taskflow_core::{run_sweep_loop, AppConfig, DefinitionSeed, Sweeper, TaskflowResult};
use taskflow_dispatcher::{
    DiagnosisService, SubtaskRetryService, TaskAggregator, TaskFactory, TaskOperationService,
    TaskScheduler,
};
use taskflow_domain::actions::PostTaskHook;
use taskflow_domain::entities::{ScheduleType, TaskDefinition};
use taskflow_domain::registry::{ActionRegistry, TemplateRegistry};
use taskflow_domain::repositories::TaskStore;
use taskflow_infrastructure::MetricsCollector;
use taskflow_worker::{
    ExecutorPools, RunningRegistry, SubtaskCancellationHandler, SubtaskDispatcher,
    SubtaskWatchdog,
};

/// 由配置装配出的完整引擎
///
/// 所有后台组件共享同一个存储和本进程的运行注册表，各自以固定延迟轮询。
pub struct Engine {
    config: AppConfig,
    host_id: String,
    store: Arc<dyn TaskStore>,
    templates: Arc<TemplateRegistry>,
    registry: RunningRegistry,
    scheduler: Arc<TaskScheduler>,
    aggregator: Arc<TaskAggregator>,
    dispatcher: Arc<SubtaskDispatcher>,
    retry: Arc<SubtaskRetryService>,
    cancellation: Arc<SubtaskCancellationHandler>,
    watchdog: Arc<SubtaskWatchdog>,
    operations: Arc<TaskOperationService>,
    diagnosis: Arc<DiagnosisService>,
}

impl Engine {
    pub fn new(
        config: AppConfig,
        store: Arc<dyn TaskStore>,
        actions: ActionRegistry,
        templates: TemplateRegistry,
        hooks: Vec<Arc<dyn PostTaskHook>>,
    ) -> Self {
        let host_id = config.engine.resolved_host_id();
        info!("初始化任务引擎，执行节点: {}", host_id);

        let metrics = Arc::new(MetricsCollector::new());
        let actions = Arc::new(actions);
        let templates = Arc::new(templates);
        let registry = RunningRegistry::new();
        let pools = Arc::new(ExecutorPools::new(&config.executor));

        let factory = Arc::new(TaskFactory::new(
            store.clone(),
            actions.clone(),
            host_id.clone(),
            metrics.clone(),
        ));
        let scheduler = Arc::new(TaskScheduler::new(
            store.clone(),
            templates.clone(),
            factory.clone(),
        ));
        let aggregator = Arc::new(
            hooks
                .into_iter()
                .fold(TaskAggregator::new(store.clone(), metrics.clone()), |agg, hook| {
                    agg.with_hook(hook)
                }),
        );
        let dispatcher = Arc::new(SubtaskDispatcher::new(
            store.clone(),
            actions,
            pools,
            registry.clone(),
            host_id.clone(),
            metrics.clone(),
        ));
        let retry = Arc::new(SubtaskRetryService::new(
            store.clone(),
            config.engine.retry_lookback_hours,
            metrics.clone(),
        ));
        let cancellation = Arc::new(SubtaskCancellationHandler::new(
            store.clone(),
            registry.clone(),
            host_id.clone(),
            config.engine.cancel_lookback_hours,
            metrics.clone(),
        ));
        let watchdog = Arc::new(SubtaskWatchdog::new(
            store.clone(),
            registry.clone(),
            config.engine.watchdog_lookback_hours,
            config.engine.timeout_slack_seconds,
            metrics,
        ));
        let operations = Arc::new(TaskOperationService::new(
            store.clone(),
            templates.clone(),
            factory,
        ));
        let diagnosis = Arc::new(DiagnosisService::new(store.clone()));

        Self {
            config,
            host_id,
            store,
            templates,
            registry,
            scheduler,
            aggregator,
            dispatcher,
            retry,
            cancellation,
            watchdog,
            operations,
            diagnosis,
        }
    }

    pub fn host_id(&self) -> &str {
        &self.host_id
    }

    pub fn store(&self) -> Arc<dyn TaskStore> {
        self.store.clone()
    }

    pub fn operations(&self) -> Arc<TaskOperationService> {
        self.operations.clone()
    }

    pub fn diagnosis(&self) -> Arc<DiagnosisService> {
        self.diagnosis.clone()
    }

    pub fn running_registry(&self) -> &RunningRegistry {
        &self.registry
    }

    /// 注册配置文件中声明的任务定义，已存在的同名启用定义会被跳过
    pub async fn seed_definitions(&self) -> Result<usize> {
        let mut created = 0;
        for seed in &self.config.definitions {
            if !self.templates.contains(&seed.template) {
                return Err(anyhow::anyhow!(
                    "任务定义 {} 引用了未注册的模板 {}",
                    seed.name,
                    seed.template
                ));
            }
            let definition = definition_from_seed(seed)?;

            let existing = self
                .store
                .find_enabled_definitions(definition.schedule_type)
                .await
                .context("查询任务定义失败")?;
            if existing.iter().any(|d| d.name == definition.name) {
                info!("任务定义 {} 已存在，跳过", definition.name);
                continue;
            }

            let saved = self
                .store
                .create_definition(&definition)
                .await
                .with_context(|| format!("注册任务定义 {} 失败", definition.name))?;
            info!(
                "已注册任务定义 {}({})，{} {}",
                saved.name, saved.id, saved.schedule_type, saved.schedule_rule
            );
            created += 1;
        }
        Ok(created)
    }

    /// 各组件及其扫描间隔
    pub fn sweepers(&self) -> Vec<(Arc<dyn Sweeper>, Duration)> {
        let engine = &self.config.engine;
        vec![
            (self.scheduler.clone() as Arc<dyn Sweeper>, engine.schedule_interval()),
            (self.aggregator.clone() as Arc<dyn Sweeper>, engine.aggregate_interval()),
            (self.dispatcher.clone() as Arc<dyn Sweeper>, engine.dispatch_interval()),
            (self.retry.clone() as Arc<dyn Sweeper>, engine.retry_interval()),
            (self.cancellation.clone() as Arc<dyn Sweeper>, engine.cancel_interval()),
            (self.watchdog.clone() as Arc<dyn Sweeper>, engine.watchdog_interval()),
        ]
    }

    /// 依次执行每个组件一轮，供测试和单次巡检使用
    pub async fn tick(&self) -> TaskflowResult<()> {
        self.scheduler.scan_and_schedule(Utc::now()).await?;
        self.cancellation.scan_canceling_subtasks(Utc::now()).await?;
        self.watchdog.scan_running_subtasks(Utc::now()).await?;
        self.retry.scan_failed_subtasks(Utc::now()).await?;
        self.aggregator.aggregate_running_tasks().await?;
        self.dispatcher.dispatch_ready_subtasks().await?;
        Ok(())
    }

    /// 启动全部扫描循环，直到收到关闭信号
    ///
    /// 正在执行的子任务不会被等待，重启后由巡检接管。
    pub async fn run(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let mut handles = Vec::new();
        for (sweeper, interval) in self.sweepers() {
            let rx = shutdown_rx.resubscribe();
            handles.push(tokio::spawn(run_sweep_loop(sweeper, interval, rx)));
        }
        info!("任务引擎已启动 {} 个扫描循环", handles.len());

        for handle in handles {
            if let Err(e) = handle.await {
                error!("扫描循环异常退出: {}", e);
            }
        }

        let in_flight = self.registry.len().await;
        if in_flight > 0 {
            warn!("{} 个子任务仍在执行，将由巡检在重启后接管", in_flight);
        }
        info!("任务引擎已停止");
        Ok(())
    }
}

fn definition_from_seed(seed: &DefinitionSeed) -> Result<TaskDefinition> {
    let schedule_type = ScheduleType::from_str(&seed.schedule_type.to_ascii_uppercase())
        .map_err(|e| anyhow::anyhow!(e))?;
    let mut definition = TaskDefinition::new(
        seed.name.clone(),
        seed.template.clone(),
        schedule_type,
        seed.schedule_rule.clone(),
    );
    definition.schedule_start_date = seed.schedule_start_date;
    definition.schedule_end_date = seed.schedule_end_date;
    definition.enabled = seed.enabled;
    definition.creator = "config".to_string();
    Ok(definition)
}
