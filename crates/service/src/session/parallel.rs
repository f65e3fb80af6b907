//! Parallel query (spec.md §4.7.4): fan out *N* independent queries and
//! collect results under either `ForAll` or `ForAny` completion policy.

use std::time::Duration;

use codec::message::Message;

use super::query::QueryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionMode {
    ForAll,
    ForAny,
}

#[derive(Debug, Clone)]
pub enum OperationResult {
    Reply(Message),
    Error(QueryError),
    Pending,
}

/// One operation of a parallel query: a target-specific send/build pair fed
/// to [`crate::session::query::query_with_retry`].
pub struct Operation<S, B>
where
    S: FnMut(Message),
    B: Fn(uuid::Uuid, bool) -> Message,
{
    pub send: S,
    pub build: B,
    pub timeout: Duration,
    pub retries: u32,
}

/// Run `operations` concurrently against `manager`.
///
/// `ForAll` awaits every operation's reply or error before returning.
/// `ForAny` returns as soon as one operation completes successfully;
/// outstanding operations keep running in the background (their results are
/// simply not in the returned snapshot — callers that need late-arriving
/// results should poll the handles themselves). If none succeed, `ForAny`
/// degrades to `ForAll` (spec.md §4.7.4: "failed-only completions under
/// `ForAny` cause the call to wait for all").
pub async fn parallel_query<S, B>(
    manager: &std::sync::Arc<super::SessionManager>,
    mode: CompletionMode,
    operations: Vec<Operation<S, B>>,
) -> Vec<OperationResult>
where
    S: FnMut(Message) + Send + 'static,
    B: Fn(uuid::Uuid, bool) -> Message + Send + 'static,
{
    let mut handles = Vec::with_capacity(operations.len());
    for op in operations {
        let manager = manager.clone();
        handles.push(tokio::spawn(async move {
            super::query::query_with_retry(&manager, op.send, op.build, op.timeout, op.retries).await
        }));
    }

    match mode {
        CompletionMode::ForAll => {
            let mut results = Vec::with_capacity(handles.len());
            for handle in handles {
                results.push(match handle.await {
                    Ok(Ok(reply)) => OperationResult::Reply(reply),
                    Ok(Err(e)) => OperationResult::Error(e),
                    Err(_join_error) => OperationResult::Error(QueryError::Cancel),
                });
            }
            results
        }
        CompletionMode::ForAny => {
            let mut results: Vec<OperationResult> = handles.iter().map(|_| OperationResult::Pending).collect();
            let mut remaining: Vec<_> = handles.into_iter().enumerate().collect();
            let mut saw_success = false;

            while !remaining.is_empty() {
                let futs: Vec<_> = remaining.iter_mut().map(|(_, h)| h).collect();
                let (outcome, idx, _rest) = futures_select(futs).await;
                let (orig_idx, _) = remaining.remove(idx);
                results[orig_idx] = match outcome {
                    Ok(Ok(reply)) => {
                        saw_success = true;
                        OperationResult::Reply(reply)
                    }
                    Ok(Err(e)) => OperationResult::Error(e),
                    Err(_join_error) => OperationResult::Error(QueryError::Cancel),
                };

                if saw_success {
                    break;
                }
            }

            results
        }
    }
}

/// Minimal `select`-over-a-vec helper: awaits whichever handle finishes
/// first, without pulling in the `futures` crate for one primitive.
async fn futures_select<T: Send + 'static>(
    handles: Vec<&mut tokio::task::JoinHandle<T>>,
) -> (Result<T, tokio::task::JoinError>, usize, ()) {
    use std::future::{Future, poll_fn};
    use std::task::Poll;

    poll_fn(|cx| {
        for (i, handle) in handles.iter_mut().enumerate() {
            if let Poll::Ready(result) = std::pin::Pin::new(&mut **handle).poll(cx) {
                return Poll::Ready((result, i, ()));
            }
        }
        Poll::Pending
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{SessionManager, SessionManagerOptions};
    use std::sync::Arc;

    fn ep(s: &str) -> codec::endpoint::MsgEp {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn for_all_waits_for_every_operation() {
        let manager = SessionManager::new(SessionManagerOptions::default());
        let manager_for_ops: Arc<SessionManager> = manager.clone();

        let ops: Vec<Operation<_, _>> = (0..3)
            .map(|_| {
                let manager = manager_for_ops.clone();
                Operation {
                    send: move |msg: Message| {
                        manager.complete(msg.session_id, Message::new("reply", ep("physical://root"), ep("physical://root")));
                    },
                    build: |id, _retry| {
                        let mut m = Message::new("app.ping", ep("physical://root"), ep("physical://root"));
                        m.session_id = id;
                        m
                    },
                    timeout: Duration::from_millis(100),
                    retries: 2,
                }
            })
            .collect();

        let results = parallel_query(&manager, CompletionMode::ForAll, ops).await;
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| matches!(r, OperationResult::Reply(_))));
    }
}
