/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Nested task forest for a single thread.
//!
//! Tasks live in an arena owned by [`TaskForest`]; parent links and child lists
//! are [`TaskId`] indices into it. Times on a [`TaskNode`] are trace
//! microseconds for `start_time`/`end_time` and milliseconds for
//! `duration`/`self_time`.

use crate::trace::TraceEvent;

/// Stable handle of a task inside its forest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub(crate) usize);

impl TaskId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Coarse classification of main-thread work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum TaskGroup {
    ParseHtml,
    StyleLayout,
    PaintCompositeRender,
    ScriptParseCompile,
    ScriptEvaluation,
    GarbageCollection,
    Other,
}

impl TaskGroup {
    pub fn for_event_name(name: &str) -> TaskGroup {
        match name {
            "ParseHTML" | "ParseAuthorStyleSheet" => TaskGroup::ParseHtml,
            "ScheduleStyleRecalculation" | "RecalculateStyles" | "UpdateLayoutTree"
            | "InvalidateLayout" | "Layout" => TaskGroup::StyleLayout,
            "Animation" | "RequestMainThreadFrame" | "ActivateLayerTree" | "DrawFrame"
            | "HitTest" | "PaintSetup" | "Paint" | "PaintImage" | "Rasterize" | "RasterTask"
            | "ScrollLayer" | "UpdateLayer" | "UpdateLayerTree" | "CompositeLayers" => {
                TaskGroup::PaintCompositeRender
            }
            "v8.compile" | "v8.compileModule" | "v8.parseOnBackground" => {
                TaskGroup::ScriptParseCompile
            }
            "EventDispatch" | "EvaluateScript" | "v8.evaluateModule" | "FunctionCall"
            | "TimerFire" | "FireIdleCallback" | "FireAnimationFrame" | "RunMicrotasks"
            | "V8.Execute" => TaskGroup::ScriptEvaluation,
            "GCEvent" | "MinorGC" | "MajorGC" | "ThreadState::performIdleLazySweep"
            | "ThreadState::completeSweep" | "BlinkGCMarking" => TaskGroup::GarbageCollection,
            _ => TaskGroup::Other,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TaskNode {
    pub event: TraceEvent,
    pub start_time: f64,
    pub end_time: f64,
    pub parent: Option<TaskId>,
    pub children: Vec<TaskId>,
    /// Total time, milliseconds.
    pub duration: f64,
    /// `duration` minus the children's durations, milliseconds.
    pub self_time: f64,
    pub group: TaskGroup,
    /// Script URL named by this task's own event.
    pub attributable_url: Option<String>,
    /// Script URLs of this task and all its ancestors, outermost first.
    pub attributable_urls: Vec<String>,
}

impl TaskNode {
    /// URL of the script this task evaluates, when it is an `EvaluateScript` task.
    pub fn evaluated_script_url(&self) -> Option<&str> {
        if self.event.name == "EvaluateScript" {
            self.attributable_url.as_deref()
        } else {
            None
        }
    }
}

/// All tasks of one thread.
#[derive(Debug, Clone, Default)]
pub struct TaskForest {
    tasks: Vec<TaskNode>,
    roots: Vec<TaskId>,
}

impl TaskForest {
    pub fn get(&self, id: TaskId) -> Option<&TaskNode> {
        self.tasks.get(id.0)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Top-level tasks in start order.
    pub fn roots(&self) -> &[TaskId] {
        &self.roots
    }

    pub fn children(&self, id: TaskId) -> &[TaskId] {
        self.get(id).map(|task| task.children.as_slice()).unwrap_or(&[])
    }

    pub fn parent(&self, id: TaskId) -> Option<TaskId> {
        self.get(id).and_then(|task| task.parent)
    }

    /// Every task in start order.
    pub fn iter(&self) -> impl Iterator<Item = (TaskId, &TaskNode)> {
        self.tasks
            .iter()
            .enumerate()
            .map(|(index, task)| (TaskId(index), task))
    }

    /// All tasks nested below `id`, depth-first in start order.
    pub fn descendants(&self, id: TaskId) -> Vec<TaskId> {
        let mut out = Vec::new();
        let mut stack: Vec<TaskId> = self.children(id).iter().rev().copied().collect();
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.children(next).iter().rev().copied());
        }
        out
    }

    /// Sum of top-level task durations, milliseconds.
    pub fn top_level_duration_ms(&self) -> f64 {
        self.roots
            .iter()
            .filter_map(|&id| self.get(id))
            .map(|task| task.duration)
            .sum()
    }
}

struct OpenTask {
    id: TaskId,
    is_begin: bool,
    /// Latest time this task may end: its own end for complete events,
    /// bounded by every enclosing task's limit.
    limit: Option<f64>,
}

/// Build the task forest of one thread from its ordered events.
///
/// `X` events nest by time range, `B`/`E` pairs by stream order. Tasks that do
/// not nest properly are resolved in favour of the most recently opened one:
/// a child never outlives its parent, and an `E` closes the innermost open `B`.
/// `B` tasks still open at the end of the stream close at `trace_end`.
pub fn build_task_forest(events: &[TraceEvent], trace_end: f64) -> TaskForest {
    let mut tasks: Vec<TaskNode> = Vec::new();
    let mut roots: Vec<TaskId> = Vec::new();
    let mut open: Vec<OpenTask> = Vec::new();

    for event in events {
        match event.ph.as_str() {
            "X" | "B" => {
                close_finished(&mut open, &mut tasks, event.ts);

                let id = TaskId(tasks.len());
                let parent = open.last();
                let parent_limit = parent.and_then(|top| top.limit);
                let is_begin = event.ph == "B";
                let limit = if is_begin {
                    parent_limit
                } else {
                    let own_end = event.end_ts().max(event.ts);
                    match parent_limit {
                        Some(bound) if own_end > bound => {
                            log::warn!(
                                "task '{}' at {} overruns its parent, clamping end {} -> {}",
                                event.name,
                                event.ts,
                                own_end,
                                bound
                            );
                            Some(bound)
                        }
                        _ => Some(own_end),
                    }
                };
                let parent = parent.map(|top| top.id);

                tasks.push(TaskNode {
                    event: event.clone(),
                    start_time: event.ts,
                    end_time: limit.unwrap_or(event.ts),
                    parent,
                    children: Vec::new(),
                    duration: 0.0,
                    self_time: 0.0,
                    group: TaskGroup::Other,
                    attributable_url: None,
                    attributable_urls: Vec::new(),
                });
                match parent {
                    Some(parent) => tasks[parent.0].children.push(id),
                    None => roots.push(id),
                }
                open.push(OpenTask {
                    id,
                    is_begin,
                    limit,
                });
            }
            "E" => {
                close_finished(&mut open, &mut tasks, event.ts);

                let Some(position) = open.iter().rposition(|task| task.is_begin) else {
                    log::warn!(
                        "dropping unmatched end event '{}' at {}",
                        event.name,
                        event.ts
                    );
                    continue;
                };
                let begin_name = &tasks[open[position].id.0].event.name;
                if *begin_name != event.name {
                    log::warn!(
                        "end event '{}' at {} closes mismatched begin '{}'",
                        event.name,
                        event.ts,
                        begin_name
                    );
                }
                for task in open.drain(position..) {
                    tasks[task.id.0].end_time = event.ts;
                }
            }
            _ => {}
        }
    }

    for task in open.drain(..) {
        let closed = &mut tasks[task.id.0];
        closed.end_time = task
            .limit
            .unwrap_or_else(|| trace_end.max(closed.start_time));
    }

    let mut forest = TaskForest { tasks, roots };
    forest.compute_times();
    forest.attribute();
    log::debug!(
        "built task forest: {} tasks, {} top-level",
        forest.tasks.len(),
        forest.roots.len()
    );
    forest
}

/// Pop every open task whose limit has passed. A `B` task popped this way was
/// outlived by an enclosing complete task and closes at that task's end.
fn close_finished(open: &mut Vec<OpenTask>, tasks: &mut [TaskNode], ts: f64) {
    while let Some(top) = open.last() {
        match top.limit {
            Some(limit) if limit <= ts => {
                if top.is_begin {
                    log::warn!(
                        "begin event '{}' outlived by its parent, closing at {}",
                        tasks[top.id.0].event.name,
                        limit
                    );
                }
                tasks[top.id.0].end_time = limit;
                open.pop();
            }
            _ => break,
        }
    }
}

impl TaskForest {
    fn compute_times(&mut self) {
        for task in &mut self.tasks {
            task.duration = (task.end_time - task.start_time) / 1000.0;
        }
        for index in 0..self.tasks.len() {
            let children_total: f64 = self.tasks[index]
                .children
                .iter()
                .map(|child| self.tasks[child.0].duration)
                .sum();
            let task = &mut self.tasks[index];
            task.self_time = task.duration - children_total;
        }
    }

    /// Parents precede their children in the arena, so one forward pass sees
    /// every parent already attributed.
    fn attribute(&mut self) {
        for index in 0..self.tasks.len() {
            let own_group = TaskGroup::for_event_name(&self.tasks[index].event.name);
            let own_url = match self.tasks[index].event.name.as_str() {
                "EvaluateScript" | "FunctionCall" | "v8.compile" => {
                    self.tasks[index].event.url().map(str::to_string)
                }
                _ => None,
            };
            let (parent_group, mut urls) = match self.tasks[index].parent {
                Some(parent) => {
                    let parent = &self.tasks[parent.0];
                    (parent.group, parent.attributable_urls.clone())
                }
                None => (TaskGroup::Other, Vec::new()),
            };
            if let Some(url) = &own_url
                && !urls.contains(url)
            {
                urls.push(url.clone());
            }

            let task = &mut self.tasks[index];
            task.group = if own_group == TaskGroup::Other {
                parent_group
            } else {
                own_group
            };
            task.attributable_url = own_url;
            task.attributable_urls = urls;
        }
    }
}
