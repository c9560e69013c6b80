use anyhow::bail;
use serde::{Deserialize, Serialize};

/// Current step of a round within the optimization loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Idle,
    Generating,
    Capturing,
    Analyzing,
    Improving,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Generating => "generating",
            Phase::Capturing => "capturing",
            Phase::Analyzing => "analyzing",
            Phase::Improving => "improving",
        }
    }
}

/// Loop run state. Owned exclusively by the loop controller while a run
/// is active; inactive implies phase idle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoopState {
    pub active: bool,
    pub current_round: u32,
    pub total_rounds: u32,
    pub phase: Phase,
}

impl Default for LoopState {
    fn default() -> Self {
        Self {
            active: false,
            current_round: 0,
            total_rounds: 3,
            phase: Phase::Idle,
        }
    }
}

impl LoopState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Activate a run. Rejected without mutation when a run is already
    /// active or the round budget is zero.
    pub fn start(&mut self, total_rounds: u32) -> anyhow::Result<()> {
        if self.active {
            bail!("optimization loop already active");
        }
        if total_rounds == 0 {
            bail!("optimization loop requires at least one round");
        }
        self.active = true;
        self.total_rounds = total_rounds;
        self.current_round = 1;
        self.phase = Phase::Generating;
        Ok(())
    }

    /// Enter round `round`, landing in the capturing phase.
    pub fn begin_round(&mut self, round: u32) -> anyhow::Result<()> {
        if !self.active {
            bail!("cannot begin a round while the loop is inactive");
        }
        if round == 0 || round > self.total_rounds {
            bail!(
                "round {round} out of range (total rounds {})",
                self.total_rounds
            );
        }
        if !matches!(self.phase, Phase::Generating | Phase::Improving) {
            bail!(
                "cannot begin round {round} from phase {}",
                self.phase.as_str()
            );
        }
        self.current_round = round;
        self.phase = Phase::Capturing;
        Ok(())
    }

    /// Advance within the fixed per-round cycle capturing -> analyzing ->
    /// improving. Any other transition is rejected.
    pub fn advance(&mut self, next: Phase) -> anyhow::Result<()> {
        if !self.active {
            bail!("cannot advance phase while the loop is inactive");
        }
        let allowed = matches!(
            (self.phase, next),
            (Phase::Capturing, Phase::Analyzing) | (Phase::Analyzing, Phase::Improving)
        );
        if !allowed {
            bail!(
                "invalid phase transition {} -> {}",
                self.phase.as_str(),
                next.as_str()
            );
        }
        self.phase = next;
        Ok(())
    }

    /// Deactivate after a completed run. The final round number is kept
    /// for inspection until the next start.
    pub fn finish(&mut self) {
        self.active = false;
        self.phase = Phase::Idle;
    }

    /// Deactivate on cooperative cancellation; same observable end state
    /// as a normal finish.
    pub fn cancel(&mut self) {
        self.finish();
    }
}
