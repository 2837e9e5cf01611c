use tokio::time::{sleep_until, Instant};

pub mod buf_ext;
pub mod seqpacket;
pub mod udp;

/// Sleeps until the deadline, or forever if there is none. Meant as a `select!` branch in event loops.
pub async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
