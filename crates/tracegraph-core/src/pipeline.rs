//! Sequential step driver.
//!
//! A pipeline threads `(data, summary)` through an ordered list of steps. The
//! output type of each step is the input type of the next, so a mis-ordered
//! pipeline does not compile. The first failing step aborts the run: later
//! steps never see the data, which is how the saver is kept from committing
//! after an upstream error.

use std::time::Instant;

use tracing::{debug, warn};

use crate::errors::TraceResult;

/// One transform in a pipeline.
pub trait PipelineStep<I, O, S> {
    fn name(&self) -> &'static str;

    fn run(&mut self, input: I, summary: &mut S) -> TraceResult<O>;
}

/// Summaries that want to hear how long each step took.
pub trait StepTimings {
    fn record_step_timing(&mut self, step: &str, elapsed_ms: u64);
}

impl StepTimings for () {
    fn record_step_timing(&mut self, _step: &str, _elapsed_ms: u64) {}
}

type Runner<'a, I, O, S> = Box<dyn FnMut(I, &mut S) -> TraceResult<O> + 'a>;

pub struct Pipeline<'a, I, O, S> {
    step_names: Vec<&'static str>,
    runner: Runner<'a, I, O, S>,
}

fn run_step<I, O, S, P>(step: &mut P, input: I, summary: &mut S) -> TraceResult<O>
where
    P: PipelineStep<I, O, S>,
    S: StepTimings,
{
    let name = step.name();
    debug!(step = name, "pipeline step starting");
    let started = Instant::now();
    match step.run(input, summary) {
        Ok(output) => {
            let elapsed_ms = started.elapsed().as_millis() as u64;
            summary.record_step_timing(name, elapsed_ms);
            debug!(step = name, elapsed_ms, "pipeline step finished");
            Ok(output)
        }
        Err(err) => {
            warn!(step = name, error = %err, "pipeline step failed; aborting remaining steps");
            Err(err)
        }
    }
}

impl<'a, I: 'a, O: 'a, S: StepTimings + 'a> Pipeline<'a, I, O, S> {
    pub fn new<P>(mut first: P) -> Self
    where
        P: PipelineStep<I, O, S> + 'a,
    {
        Self {
            step_names: vec![first.name()],
            runner: Box::new(move |input, summary| run_step(&mut first, input, summary)),
        }
    }

    /// Append a step consuming this pipeline's output.
    pub fn then<N, P>(self, mut next: P) -> Pipeline<'a, I, N, S>
    where
        N: 'a,
        P: PipelineStep<O, N, S> + 'a,
    {
        let mut step_names = self.step_names;
        step_names.push(next.name());
        let mut previous = self.runner;
        Pipeline {
            step_names,
            runner: Box::new(move |input, summary| {
                let intermediate = previous(input, summary)?;
                run_step(&mut next, intermediate, summary)
            }),
        }
    }

    pub fn step_names(&self) -> &[&'static str] {
        &self.step_names
    }

    pub fn run(&mut self, input: I, mut summary: S) -> TraceResult<(O, S)> {
        let output = (self.runner)(input, &mut summary)?;
        Ok((output, summary))
    }
}
