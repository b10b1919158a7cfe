// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Generic iterative optimizer state machine.
//!
//! An optimizer (typically Levenberg-Marquardt) is expressed as a `State`
//! holding the model and the data of its last successful evaluation.
//! The default `iterative_solve` drives the step / eval / stop cycle.

/// Enum used to indicate if iterations should continue or stop.
pub enum Continue {
    /// Stop iterations.
    Stop,
    /// Continue iterations.
    Forward,
}

/// Interface for an iterative optimizer.
///
/// - `Obs`: observations, fixed for the duration of the solve.
/// - `EvalState`: result of a model evaluation, typically
///   `Result<EvalData, Energy>` where the error case means the energy
///   increased and the step should be retried with more damping.
/// - `Model`: the model of what is being optimized.
/// - `E`: error type of a failed step (e.g. a singular system).
pub trait State<Obs, EvalState, Model, E>: Sized {
    /// Initialize the optimizer state from observations and an initial model.
    fn init(obs: &Obs, model: Model) -> Self;
    /// Compute the next model candidate.
    fn step(&self) -> Result<Model, E>;
    /// Evaluate the model candidate.
    fn eval(&self, obs: &Obs, model: Model) -> EvalState;
    /// Decide if iterations should continue, and merge the evaluation
    /// into the kept state.
    fn stop_criterion(self, nb_iter: usize, eval_state: EvalState) -> (Self, Continue);

    /// Iteratively solve the optimization problem.
    /// Return the final state and the number of iterations.
    fn iterative_solve(obs: &Obs, initial_model: Model) -> Result<(Self, usize), E> {
        let mut state = Self::init(obs, initial_model);
        let mut nb_iter = 0;
        loop {
            nb_iter += 1;
            let new_model = state.step()?;
            let eval_state = state.eval(obs, new_model);
            let (kept_state, continuation) = state.stop_criterion(nb_iter, eval_state);
            state = kept_state;
            if let Continue::Stop = continuation {
                return Ok((state, nb_iter));
            }
        }
    }
}
