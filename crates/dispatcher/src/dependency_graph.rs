use std::collections::{HashMap, VecDeque};

use futures::future::{join_all, BoxFuture, Shared};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use analyzer_core::models::{TaskOutcome, TaskSpec};
use analyzer_core::{AnalyzerError, AnalyzerResult};

use crate::executor::Executor;

/// 依赖图中的一个节点
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphNode {
    pub key: String,
    pub spec: TaskSpec,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl GraphNode {
    pub fn new(key: impl Into<String>, spec: TaskSpec) -> Self {
        Self {
            key: key.into(),
            spec,
            depends_on: Vec::new(),
        }
    }

    pub fn depends_on<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on.extend(keys.into_iter().map(Into::into));
        self
    }
}

/// 校验通过的依赖图
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    keys: Vec<String>,
    /// 每个节点依赖的节点下标
    dependencies: Vec<Vec<usize>>,
    /// 拓扑序
    order: Vec<usize>,
}

impl DependencyGraph {
    /// 构建并校验依赖图
    ///
    /// 依次检查重复的键、未知依赖、自依赖，最后用Kahn算法做拓扑排序，
    /// 排序不完整即说明存在环，返回环上的节点路径。
    pub fn build(nodes: &[GraphNode]) -> AnalyzerResult<Self> {
        let mut index: HashMap<&str, usize> = HashMap::with_capacity(nodes.len());
        for (i, node) in nodes.iter().enumerate() {
            if index.insert(node.key.as_str(), i).is_some() {
                return Err(AnalyzerError::InvalidDependency {
                    node: node.key.clone(),
                    dependency: node.key.clone(),
                    reason: "节点键重复".to_string(),
                });
            }
        }

        let mut dependencies = Vec::with_capacity(nodes.len());
        for node in nodes {
            let mut deps = Vec::with_capacity(node.depends_on.len());
            for dependency in &node.depends_on {
                if dependency == &node.key {
                    return Err(AnalyzerError::InvalidDependency {
                        node: node.key.clone(),
                        dependency: dependency.clone(),
                        reason: "不能依赖自身".to_string(),
                    });
                }
                let Some(&dep) = index.get(dependency.as_str()) else {
                    return Err(AnalyzerError::InvalidDependency {
                        node: node.key.clone(),
                        dependency: dependency.clone(),
                        reason: "依赖的节点不存在".to_string(),
                    });
                };
                if !deps.contains(&dep) {
                    deps.push(dep);
                }
            }
            dependencies.push(deps);
        }

        let keys: Vec<String> = nodes.iter().map(|n| n.key.clone()).collect();
        let order = topological_order(&keys, &dependencies)?;

        Ok(Self {
            keys,
            dependencies,
            order,
        })
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// 拓扑序下的节点键
    pub fn execution_order(&self) -> Vec<&str> {
        self.order.iter().map(|&i| self.keys[i].as_str()).collect()
    }
}

fn topological_order(keys: &[String], dependencies: &[Vec<usize>]) -> AnalyzerResult<Vec<usize>> {
    let n = keys.len();
    let mut in_degree: Vec<usize> = dependencies.iter().map(Vec::len).collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (node, deps) in dependencies.iter().enumerate() {
        for &dep in deps {
            dependents[dep].push(node);
        }
    }

    let mut ready: VecDeque<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(n);

    while let Some(node) = ready.pop_front() {
        order.push(node);
        for &dependent in &dependents[node] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                ready.push_back(dependent);
            }
        }
    }

    if order.len() == n {
        return Ok(order);
    }

    Err(AnalyzerError::CyclicDependency {
        cycle: find_cycle(keys, dependencies, &in_degree),
    })
}

/// 在拓扑排序剩下的节点中找出一条环
///
/// 剩余节点都至少还有一个未完成的依赖，沿着这些依赖一直走必然回到走过的节点。
fn find_cycle(keys: &[String], dependencies: &[Vec<usize>], in_degree: &[usize]) -> Vec<String> {
    let remaining = |i: usize| in_degree[i] > 0;
    let Some(start) = (0..keys.len()).find(|&i| remaining(i)) else {
        return Vec::new();
    };

    let mut path = vec![start];
    let mut position: HashMap<usize, usize> = HashMap::from([(start, 0)]);
    let mut current = start;

    loop {
        let Some(&next) = dependencies[current].iter().find(|&&d| remaining(d)) else {
            return path.iter().map(|&i| keys[i].clone()).collect();
        };
        if let Some(&pos) = position.get(&next) {
            let mut cycle: Vec<String> = path[pos..].iter().map(|&i| keys[i].clone()).collect();
            cycle.push(keys[next].clone());
            return cycle;
        }
        position.insert(next, path.len());
        path.push(next);
        current = next;
    }
}

/// 按依赖关系执行任务图，结果按输入顺序返回
///
/// 节点只有在全部依赖成功后才会提交；任一依赖失败时节点不执行，
/// 结果为 `DependencyFailed`。互不依赖的分支并发执行。
pub async fn run_graph<E>(executor: &E, nodes: Vec<GraphNode>) -> AnalyzerResult<Vec<TaskOutcome>>
where
    E: Executor + ?Sized,
{
    let graph = DependencyGraph::build(&nodes)?;
    info!(
        "开始执行依赖图: {} 个节点, 执行器 {}",
        graph.len(),
        executor.name()
    );

    let mut specs: Vec<Option<TaskSpec>> = nodes.into_iter().map(|n| Some(n.spec)).collect();
    let mut slots: Vec<Option<Shared<BoxFuture<'_, TaskOutcome>>>> = vec![None; graph.len()];

    for &node in &graph.order {
        let mut upstream = Vec::with_capacity(graph.dependencies[node].len());
        for &dep in &graph.dependencies[node] {
            let future = slots[dep].clone().ok_or_else(|| {
                AnalyzerError::Internal(format!("依赖节点 {} 尚未调度", graph.keys[dep]))
            })?;
            upstream.push((graph.keys[dep].clone(), future));
        }
        let spec = specs[node]
            .take()
            .ok_or_else(|| AnalyzerError::Internal(format!("节点 {} 重复调度", graph.keys[node])))?;
        let key = graph.keys[node].clone();

        let future = async move {
            let mut dependency_ids = Vec::with_capacity(upstream.len());
            for (dependency, outcome) in upstream {
                match outcome.await {
                    Ok(output) => dependency_ids.push(output.task_id),
                    Err(_) => {
                        debug!("节点 {} 的依赖 {} 失败，跳过执行", key, dependency);
                        return Err(AnalyzerError::DependencyFailed {
                            node: key,
                            dependency,
                        });
                    }
                }
            }
            match executor.submit(spec.with_dependencies(dependency_ids)) {
                Ok(handle) => handle.wait().await,
                Err(e) => Err(e),
            }
        }
        .boxed()
        .shared();
        slots[node] = Some(future);
    }

    let futures = slots
        .into_iter()
        .enumerate()
        .map(|(i, slot)| {
            slot.ok_or_else(|| AnalyzerError::Internal(format!("节点 {} 未调度", graph.keys[i])))
        })
        .collect::<AnalyzerResult<Vec<_>>>()?;

    Ok(join_all(futures).await)
}
