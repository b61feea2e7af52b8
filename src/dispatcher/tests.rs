//! Dispatcher Module Tests
//!
//! ## Test Scopes
//! - **Codecs**: both codecs carry every command shape; garbage is a decode error.
//! - **Handler registry**: registration, execution, unknown and failing handlers.
//! - **RequestDispatcher**: target resolution, fail-fast scatter/gather, timeouts vs remote errors.

#[cfg(test)]
mod tests {
    use crate::dispatcher::codec::{BincodeCodec, CodecKind, JsonCodec, MessageCodec};
    use crate::dispatcher::handlers::{CommandHandlerRegistry, Invocation};
    use crate::dispatcher::protocol::{
        Command, Envelope, ErrorResponse, FailureKind, Response, WireMessage,
    };
    use crate::dispatcher::service::RequestDispatcher;
    use crate::error::{FederationError, Result};
    use crate::membership::naming;
    use crate::membership::types::{Address, RuntimeIdentity, View};
    use crate::transport::memory::{MemoryChannel, MemoryNetwork};
    use crate::transport::{ChannelHandler, GroupChannel, ResponseMode};
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Clone, Copy, PartialEq)]
    enum Behavior {
        Reply,
        Fail,
        Mute,
    }

    struct Responder {
        runtime: String,
        behavior: Behavior,
        hits: AtomicUsize,
        received: AtomicUsize,
    }

    impl Responder {
        fn new(runtime: &str, behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                runtime: runtime.to_string(),
                behavior,
                hits: AtomicUsize::new(0),
                received: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl ChannelHandler for Responder {
        fn view_accepted(&self, _view: View) {}

        async fn receive(&self, _from: Address, _payload: Vec<u8>) {
            self.received.fetch_add(1, Ordering::SeqCst);
        }

        async fn handle_request(&self, _from: Address, payload: Vec<u8>) -> Result<Vec<u8>> {
            self.hits.fetch_add(1, Ordering::SeqCst);
            let response = match (self.behavior, BincodeCodec.deserialize(&payload)?) {
                (Behavior::Fail, _) => Response::Error(ErrorResponse {
                    runtime: self.runtime.clone(),
                    message: "boom".to_string(),
                }),
                (
                    _,
                    WireMessage::Command(Envelope {
                        command: Command::Execute { payload, .. },
                        ..
                    }),
                ) => Response::Payload(payload),
                _ => Response::Ack,
            };
            BincodeCodec.serialize(&WireMessage::Response(response))
        }
    }

    struct Domain {
        network: Arc<MemoryNetwork>,
        dispatcher: Arc<RequestDispatcher>,
        caller: Arc<Responder>,
        members: Vec<(Arc<MemoryChannel>, Arc<Responder>)>,
    }

    /// Connects the calling controller first, then `members` in order.
    async fn domain(members: &[(RuntimeIdentity, Behavior)]) -> Domain {
        let network = MemoryNetwork::new();
        let caller_channel = network.channel(naming::encode(&RuntimeIdentity::controller("a")).unwrap());
        let caller = Responder::new("a", Behavior::Reply);
        caller_channel.set_handler(caller.clone());
        caller_channel.connect("domain").await.unwrap();

        let mut connected = Vec::new();
        for (identity, behavior) in members {
            let channel = network.channel(naming::encode(identity).unwrap());
            let responder = Responder::new(&identity.runtime_name, *behavior);
            channel.set_handler(responder.clone());
            channel.connect("domain").await.unwrap();
            if *behavior == Behavior::Mute {
                network.mute(&channel.local_address().unwrap(), true);
            }
            connected.push((channel, responder));
        }

        let dispatcher = RequestDispatcher::new(caller_channel, Arc::new(BincodeCodec), "a");
        dispatcher.start();
        Domain {
            network,
            dispatcher,
            caller,
            members: connected,
        }
    }

    fn execute(payload: &[u8]) -> Command {
        Command::Execute {
            handler: "echo".to_string(),
            payload: payload.to_vec(),
        }
    }

    fn failure(response: &Response) -> (String, FailureKind) {
        match response {
            Response::RemoteSystem(error) => (error.runtime.clone(), error.kind),
            other => panic!("expected a remote system failure, got {other:?}"),
        }
    }

    async fn eventually(check: impl Fn() -> bool) -> bool {
        for _ in 0..200 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        check()
    }

    // ============================================================
    // CODEC TESTS
    // ============================================================

    #[test]
    fn test_codecs_carry_commands_and_responses() {
        let messages = vec![
            WireMessage::Command(Envelope {
                sender: "b".to_string(),
                command: Command::ControllerAvailable {
                    controller: "a".to_string(),
                },
            }),
            WireMessage::Command(Envelope {
                sender: "b".to_string(),
                command: execute(b"\x00\x01"),
            }),
            WireMessage::Response(Response::Error(ErrorResponse {
                runtime: "c".to_string(),
                message: "boom".to_string(),
            })),
        ];

        for codec in [CodecKind::Bincode.build(), CodecKind::Json.build()] {
            for message in &messages {
                let bytes = codec.serialize(message).unwrap();
                assert_eq!(&codec.deserialize(&bytes).unwrap(), message, "{}", codec.name());
            }
        }
    }

    #[test]
    fn test_garbage_is_a_decode_error() {
        assert!(matches!(
            BincodeCodec.deserialize(&[0xff, 0xff, 0xff, 0xff, 0xff]),
            Err(FederationError::Decode(_))
        ));
        assert!(matches!(
            JsonCodec.deserialize(b"{not json"),
            Err(FederationError::Decode(_))
        ));
    }

    // ============================================================
    // HANDLER REGISTRY TESTS
    // ============================================================

    #[tokio::test]
    async fn test_registry_register_and_execute() {
        // ARRANGE
        let registry = CommandHandlerRegistry::new();
        let call_count = Arc::new(AtomicUsize::new(0));
        let call_count_clone = call_count.clone();

        registry.register("echo", move |invocation: Invocation| {
            let count = call_count_clone.clone();
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(invocation.payload)
            }
        });

        // ACT
        let result = registry
            .execute(
                "echo",
                Invocation {
                    sender: "b".to_string(),
                    payload: b"hi".to_vec(),
                },
            )
            .await;

        // ASSERT
        assert_eq!(result.unwrap(), b"hi".to_vec());
        assert_eq!(call_count.load(Ordering::SeqCst), 1);
        assert!(registry.has_handler("echo"));
        assert_eq!(registry.list_handlers(), vec!["echo".to_string()]);
    }

    #[tokio::test]
    async fn test_registry_unknown_and_failing_handlers() {
        let registry = CommandHandlerRegistry::new();
        registry.register("failing", |_invocation| async {
            Err(anyhow::anyhow!("Intentional error"))
        });
        let invocation = Invocation {
            sender: "b".to_string(),
            payload: Vec::new(),
        };

        let unknown = registry.execute("missing", invocation.clone()).await;
        assert!(unknown.unwrap_err().to_string().contains("Unknown command handler"));

        let failed = registry.execute("failing", invocation).await;
        assert!(failed.unwrap_err().to_string().contains("Intentional error"));

        assert!(registry.deregister("failing"));
        assert_eq!(registry.handler_count(), 0);
    }

    // ============================================================
    // SYNCHRONOUS ZONE SEND TESTS
    // ============================================================

    #[tokio::test]
    async fn test_fail_fast_stops_at_first_failure() {
        let domain = domain(&[
            (RuntimeIdentity::participant("z1", "b"), Behavior::Reply),
            (RuntimeIdentity::participant("z1", "c"), Behavior::Fail),
            (RuntimeIdentity::participant("z1", "d"), Behavior::Reply),
        ])
        .await;

        let responses = domain
            .dispatcher
            .send_synchronous_to_zone("z1", execute(b"x"), true, Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0], Response::Payload(b"x".to_vec()));
        assert_eq!(failure(&responses[1]), ("c".to_string(), FailureKind::Remote));
        // d was never contacted.
        assert_eq!(domain.members[2].1.hits.load(Ordering::SeqCst), 0);
        assert_eq!(domain.network.requests().await.len(), 2);
    }

    #[tokio::test]
    async fn test_without_fail_fast_every_member_answers_in_order() {
        let domain = domain(&[
            (RuntimeIdentity::participant("z1", "b"), Behavior::Reply),
            (RuntimeIdentity::participant("z1", "c"), Behavior::Mute),
            (RuntimeIdentity::participant("z1", "d"), Behavior::Fail),
            (RuntimeIdentity::participant("z2", "e"), Behavior::Reply),
        ])
        .await;

        let responses = domain
            .dispatcher
            .send_synchronous_to_zone("z1", execute(b"x"), false, Duration::from_millis(50))
            .await
            .unwrap();

        assert_eq!(responses.len(), 3);
        assert_eq!(responses[0], Response::Payload(b"x".to_vec()));
        assert_eq!(failure(&responses[1]), ("c".to_string(), FailureKind::Timeout));
        assert_eq!(failure(&responses[2]), ("d".to_string(), FailureKind::Remote));
        assert_eq!(domain.members[3].1.hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_zone_yields_no_responses() {
        let domain = domain(&[(RuntimeIdentity::participant("z1", "b"), Behavior::Reply)]).await;

        let responses = domain
            .dispatcher
            .send_synchronous_to_zone("nowhere", execute(b"x"), true, Duration::from_secs(1))
            .await
            .unwrap();

        assert!(responses.is_empty());
    }

    // ============================================================
    // SINGLE TARGET TESTS
    // ============================================================

    #[tokio::test]
    async fn test_unresolved_target_fails_without_sending() {
        let domain = domain(&[(RuntimeIdentity::participant("z1", "b"), Behavior::Reply)]).await;

        let err = domain
            .dispatcher
            .send_synchronous("ghost", execute(b"x"), Duration::from_secs(1))
            .await
            .unwrap_err();

        assert!(matches!(err, FederationError::RuntimeNotFound(ref name) if name == "ghost"));
        assert!(domain.network.requests().await.is_empty());
        assert!(matches!(
            domain.dispatcher.send_asynchronous("ghost", execute(b"x")).await,
            Err(FederationError::RuntimeNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_timeout_is_distinguishable_from_remote_error() {
        let domain = domain(&[
            (RuntimeIdentity::participant("z1", "b"), Behavior::Mute),
            (RuntimeIdentity::participant("z1", "c"), Behavior::Fail),
        ])
        .await;

        let timeout = domain
            .dispatcher
            .send_synchronous("b", execute(b"x"), Duration::from_millis(30))
            .await
            .unwrap_err();
        assert!(timeout.is_timeout());
        assert!(matches!(timeout, FederationError::UnreachablePeer { ref target, .. } if target == "b"));

        let remote = domain
            .dispatcher
            .send_synchronous("c", execute(b"x"), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(!remote.is_timeout());
        assert!(matches!(remote, FederationError::RemoteError { ref runtime, .. } if runtime == "c"));
    }

    #[tokio::test]
    async fn test_send_first_uses_get_first_mode() {
        let domain = domain(&[(RuntimeIdentity::node("z1", "b"), Behavior::Reply)]).await;
        let target = domain.members[0].0.local_address().unwrap();

        let response = domain
            .dispatcher
            .send_first(&target, Command::DomainSnapshotRequest, Duration::from_millis(10_000))
            .await
            .unwrap();

        assert_eq!(response, Response::Ack);
        let requests = domain.network.requests().await;
        assert_eq!(requests[0].options.mode, ResponseMode::GetFirst);
        assert_eq!(requests[0].options.timeout, Duration::from_millis(10_000));
    }

    // ============================================================
    // CONTROLLER TESTS
    // ============================================================

    #[tokio::test]
    async fn test_controller_not_found() {
        let network = MemoryNetwork::new();
        let channel = network.channel(naming::encode(&RuntimeIdentity::participant("z1", "b")).unwrap());
        channel.set_handler(Responder::new("b", Behavior::Reply));
        channel.connect("domain").await.unwrap();
        let dispatcher = RequestDispatcher::new(channel, Arc::new(BincodeCodec), "b");
        dispatcher.start();

        assert!(matches!(
            dispatcher
                .send_synchronous_to_controller(Command::DeploymentRequest { zone: "z1".into() }, Duration::from_secs(1))
                .await,
            Err(FederationError::ControllerNotFound)
        ));
        assert!(matches!(
            dispatcher
                .send_asynchronous_to_controller(Command::RuntimeMetadataUpdate)
                .await,
            Err(FederationError::ControllerNotFound)
        ));
        assert!(network.requests().await.is_empty());
    }

    #[tokio::test]
    async fn test_controller_is_resolved_from_view() {
        let network = MemoryNetwork::new();
        let controller = network.channel(naming::encode(&RuntimeIdentity::controller("a")).unwrap());
        controller.set_handler(Responder::new("a", Behavior::Reply));
        controller.connect("domain").await.unwrap();
        let channel = network.channel(naming::encode(&RuntimeIdentity::participant("z1", "b")).unwrap());
        channel.set_handler(Responder::new("b", Behavior::Reply));
        channel.connect("domain").await.unwrap();
        let dispatcher = RequestDispatcher::new(channel, Arc::new(BincodeCodec), "b");
        dispatcher.start();

        let response = dispatcher
            .send_synchronous_to_controller(execute(b"deploy"), Duration::from_secs(1))
            .await
            .unwrap();

        assert_eq!(response, Response::Payload(b"deploy".to_vec()));
        assert_eq!(network.requests().await[0].target, controller.local_address().unwrap());
    }

    // ============================================================
    // ASYNCHRONOUS TESTS
    // ============================================================

    #[tokio::test]
    async fn test_broadcast_to_zone_reaches_only_zone_members() {
        let domain = domain(&[
            (RuntimeIdentity::participant("z1", "b"), Behavior::Reply),
            (RuntimeIdentity::participant("z1", "c"), Behavior::Reply),
            (RuntimeIdentity::participant("z2", "d"), Behavior::Reply),
        ])
        .await;

        domain
            .dispatcher
            .broadcast_to_zone("z1", Command::ZoneMetadataUpdate)
            .await
            .unwrap();

        let b = domain.members[0].1.clone();
        let c = domain.members[1].1.clone();
        assert!(eventually(|| b.received.load(Ordering::SeqCst) == 1).await);
        assert!(eventually(|| c.received.load(Ordering::SeqCst) == 1).await);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(domain.members[2].1.received.load(Ordering::SeqCst), 0);
        assert_eq!(domain.caller.received.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_broadcast_to_domain_reaches_everyone() {
        let domain = domain(&[
            (RuntimeIdentity::participant("z1", "b"), Behavior::Reply),
            (RuntimeIdentity::participant("z2", "c"), Behavior::Reply),
        ])
        .await;

        domain
            .dispatcher
            .broadcast_to_domain(Command::ControllerAvailable {
                controller: "a".to_string(),
            })
            .await
            .unwrap();

        let caller = domain.caller.clone();
        let b = domain.members[0].1.clone();
        let c = domain.members[1].1.clone();
        assert!(eventually(|| caller.received.load(Ordering::SeqCst) == 1).await);
        assert!(eventually(|| b.received.load(Ordering::SeqCst) == 1).await);
        assert!(eventually(|| c.received.load(Ordering::SeqCst) == 1).await);
    }

    #[tokio::test]
    async fn test_stopped_dispatcher_is_not_connected() {
        let domain = domain(&[(RuntimeIdentity::participant("z1", "b"), Behavior::Reply)]).await;
        domain.dispatcher.stop();

        assert!(!domain.dispatcher.is_running());
        assert!(matches!(
            domain
                .dispatcher
                .send_synchronous("b", execute(b"x"), Duration::from_secs(1))
                .await,
            Err(FederationError::NotConnected)
        ));
        assert!(matches!(
            domain.dispatcher.broadcast_to_domain(Command::ZoneMetadataUpdate).await,
            Err(FederationError::NotConnected)
        ));
    }
}
