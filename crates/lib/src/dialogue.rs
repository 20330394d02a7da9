//! Prompt-driven RACF dialogue
//!
//! The RACF server behaves like a line-mode terminal: it sends `TGET` when it
//! wants one line of operator input, and plain output lines otherwise. A
//! [`Dialogue`] answers those prompts on behalf of the operator using nothing
//! but the original command, and collects the output.
//!
//! # Prompt sequence
//!
//! ```text
//! TGET  -> command      (AwaitingCommand)
//! TGET  -> end          (AwaitingConfirmation, done unless a reenter error was seen)
//! TGET  -> end          (AwaitingRetry, done; the command was rejected)
//! ```
//!
//! If the server asks for an operand again (`IKJ56718A REENTER THIS OPERAND`)
//! there is nobody to type a corrected value, so the dialogue is ended and the
//! outcome is reported as [`Completion::Rejected`].

use tracing::{debug, warn};

use crate::request::Request;
use crate::response::ResponseBuffer;

/// Line the server sends when it is waiting for input
pub const PROMPT: &str = "TGET";

/// Reply that ends the terminal session
pub const END_KEYWORD: &str = "end";

/// Server asks for the previous operand again
pub const REENTER_MARKER: &str = "IKJ56718A REENTER THIS OPERAND+ -";

/// Server chatter that never belongs in the command output
pub const NOISE_PATTERNS: [&str; 6] = [
    "INVALID",
    "NAME TO BE ADDED TO RACF DATA SET ALREADY EXISTS",
    "TO TERMINATE ENTER ",
    "END      NOT ADDED",
    "RACF CMND ERROR.",
    REENTER_MARKER,
];

/// Appended to the output when the server rejected the command
pub const REJECTED_NOTICE: &str = "IKJ56718A - INVALID COMMAND\nPLEASE ENTER AGAIN\n";

/// How a finished dialogue ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// The server ran the command
    Accepted,
    /// The server asked for an operand again and the dialogue was ended instead
    Rejected,
}

/// Where the dialogue stands, in terms of the next prompt it expects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AwaitingCommand,
    AwaitingConfirmation,
    AwaitingRetry,
    Complete(Completion),
}

/// Which line to send back at a prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reply {
    Command,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Transition {
    reply: Reply,
    next: Phase,
    reenters: u32,
}

/// Decide the reply and next phase for a prompt received in `phase`
fn transition(phase: Phase, reenters: u32) -> Option<Transition> {
    let t = match phase {
        Phase::AwaitingCommand if reenters == 1 => Transition {
            reply: Reply::End,
            next: Phase::AwaitingConfirmation,
            reenters: 2,
        },
        Phase::AwaitingCommand => Transition {
            reply: Reply::Command,
            next: Phase::AwaitingConfirmation,
            reenters,
        },
        Phase::AwaitingConfirmation if reenters == 0 => Transition {
            reply: Reply::End,
            next: Phase::Complete(Completion::Accepted),
            reenters,
        },
        Phase::AwaitingConfirmation => Transition {
            reply: Reply::End,
            next: Phase::AwaitingRetry,
            reenters,
        },
        Phase::AwaitingRetry => Transition {
            reply: Reply::End,
            next: Phase::Complete(if reenters == 0 {
                Completion::Accepted
            } else {
                Completion::Rejected
            }),
            reenters,
        },
        Phase::Complete(_) => return None,
    };
    Some(t)
}

/// Whether a decoded line is server chatter to keep out of the output
pub fn is_noise(line: &str) -> bool {
    NOISE_PATTERNS.iter().any(|p| line.contains(p))
}

/// Result of feeding one line to the dialogue
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Nothing to send; keep receiving
    Absorbed,
    /// Send this line, then keep receiving
    Reply(String),
    /// Send `reply`; the dialogue is over
    Finished { reply: String, outcome: Outcome },
}

/// Final text of a completed dialogue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub completion: Completion,
    /// Collected output, followed by [`REJECTED_NOTICE`] when rejected
    pub text: String,
    /// Some output was dropped because the buffer was full
    pub truncated: bool,
}

/// State of one command's conversation with the server
#[derive(Debug)]
pub struct Dialogue {
    request: Request,
    phase: Phase,
    prompts: u32,
    reenters: u32,
    response: ResponseBuffer,
}

impl Dialogue {
    pub fn new(request: Request) -> Self {
        Self::with_buffer(request, ResponseBuffer::new())
    }

    pub fn with_buffer(request: Request, response: ResponseBuffer) -> Self {
        Self {
            request,
            phase: Phase::AwaitingCommand,
            prompts: 0,
            reenters: 0,
            response,
        }
    }

    /// Process one decoded line from the server
    pub fn feed(&mut self, line: &str) -> Step {
        if line.contains(REENTER_MARKER) {
            self.reenters += 1;
            debug!(reenters = self.reenters, "Server asked to reenter an operand");
        }

        if line == PROMPT {
            return self.on_prompt();
        }

        if !is_noise(line) {
            let was_truncated = self.response.is_truncated();
            if !self.response.push_line(line) && !was_truncated {
                warn!(
                    degraded = true,
                    kept = self.response.len(),
                    "Response buffer full, dropping remaining output"
                );
            }
        }
        Step::Absorbed
    }

    fn on_prompt(&mut self) -> Step {
        let Some(t) = transition(self.phase, self.reenters) else {
            debug!(phase = ?self.phase, "Prompt after completion ignored");
            return Step::Absorbed;
        };

        self.prompts += 1;
        self.reenters = t.reenters;
        self.phase = t.next;

        let line = match t.reply {
            Reply::Command => self.request.as_str().to_string(),
            Reply::End => END_KEYWORD.to_string(),
        };
        debug!(prompts = self.prompts, reply = ?t.reply, "Answering prompt");

        match self.phase {
            Phase::Complete(completion) => Step::Finished {
                reply: line,
                outcome: self.take_outcome(completion),
            },
            _ => Step::Reply(line),
        }
    }

    fn take_outcome(&mut self, completion: Completion) -> Outcome {
        let response = std::mem::take(&mut self.response);
        let truncated = response.is_truncated();
        let mut text = response.into_string();
        if completion == Completion::Rejected {
            text.push_str(REJECTED_NOTICE);
        }
        Outcome {
            completion,
            text,
            truncated,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Prompts answered so far
    pub fn prompt_count(&self) -> u32 {
        self.prompts
    }

    /// Reenter errors seen so far (2 once one has ended the dialogue early)
    pub fn reenter_count(&self) -> u32 {
        self.reenters
    }

    pub fn response(&self) -> &ResponseBuffer {
        &self.response
    }
}
