//! End-to-end exchange scenarios (`spec.md` §8) driven through the
//! public `exchange` API with small mock `ExchangeHandlers`/`Clock`
//! collaborators, plus the CBOR encoder feeding a real payload into one
//! of them.

use anj_core::error::ExchangeOutcome;
use anj_core::exchange::{
    CoapMsgType, ExchangeAction, ExchangeCtx, ExchangeEvent, ExchangeHandlers, ExchangeTiming,
    InboundMessage, ReadOutcome, Clock,
};
use anj_core::io::cbor::CborEncoder;
use anj_core::value::Value;
use core::cell::Cell;

struct FixedClock(Cell<u64>);

impl Clock for FixedClock {
    fn now_ms(&self) -> u64 {
        self.0.get()
    }
}

struct CountingRng(u32);

impl rand_core::RngCore for CountingRng {
    fn next_u32(&mut self) -> u32 {
        self.0 = self.0.wrapping_add(1);
        self.0
    }
    fn next_u64(&mut self) -> u64 {
        ((self.next_u32() as u64) << 32) | self.next_u32() as u64
    }
    fn fill_bytes(&mut self, dest: &mut [u8]) {
        for b in dest.iter_mut() {
            *b = self.next_u32() as u8;
        }
    }
    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> Result<(), rand_core::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

struct OneShotHandlers {
    payload: heapless::Vec<u8, 64>,
    sent: bool,
    completions: heapless::Vec<ExchangeOutcome, 4>,
}

impl OneShotHandlers {
    fn new(payload: &[u8]) -> Self {
        let mut v = heapless::Vec::new();
        v.extend_from_slice(payload).unwrap();
        OneShotHandlers {
            payload: v,
            sent: false,
            completions: heapless::Vec::new(),
        }
    }
}

impl ExchangeHandlers for OneShotHandlers {
    fn read_payload(&mut self, buf: &mut [u8]) -> Result<ReadOutcome, i32> {
        let n = self.payload.len();
        buf[..n].copy_from_slice(&self.payload);
        self.sent = true;
        Ok(ReadOutcome::Done(n))
    }

    fn write_payload(&mut self, _buf: &[u8], _is_last_block: bool) -> Result<(), u8> {
        Ok(())
    }

    fn completion(&mut self, outcome: ExchangeOutcome) {
        self.completions.push(outcome).ok();
    }
}

/// A single CBOR integer resource sent as a non-confirmable request
/// completes on the first `SendConfirmation` with no server round trip.
#[test]
fn non_confirmable_send_of_one_cbor_resource() {
    let mut enc = CborEncoder::new();
    enc.new_entry(Value::Uint(42)).unwrap();
    let mut payload = [0u8; 8];
    let (n, _) = enc.get_payload(&mut payload).unwrap();
    assert_eq!(&payload[..n], &[0x18, 0x2a]);

    let mut ex = ExchangeCtx::new(
        OneShotHandlers::new(&payload[..n]),
        FixedClock(Cell::new(0)),
        CountingRng(1),
        ExchangeTiming::default(),
    );
    ex.new_client_request(0x02, false, false, 64).unwrap();

    match ex.process(ExchangeEvent::None).unwrap() {
        ExchangeAction::Send(msg) => {
            assert_eq!(msg.msg_type, CoapMsgType::Non);
            assert_eq!(ex.outbound_payload(), &[0x18, 0x2a]);
        }
        other => panic!("expected send, got {other:?}"),
    }
    match ex.process(ExchangeEvent::SendConfirmation).unwrap() {
        ExchangeAction::Done(ExchangeOutcome::Response(0)) => {}
        other => panic!("expected immediate completion, got {other:?}"),
    }
}

/// A confirmable exchange interrupted by an unrelated server request gets
/// a 5.03 reply without leaving `WaitMsg`, then still completes normally
/// once its own response arrives.
#[test]
fn interrupting_request_does_not_derail_pending_exchange() {
    let mut ex = ExchangeCtx::new(
        OneShotHandlers::new(&[0xAA]),
        FixedClock(Cell::new(0)),
        CountingRng(7),
        ExchangeTiming::default(),
    );
    ex.new_client_request(0x03, true, false, 64).unwrap();
    let own_token = match ex.process(ExchangeEvent::None).unwrap() {
        ExchangeAction::Send(msg) => msg.token,
        other => panic!("expected send, got {other:?}"),
    };
    ex.process(ExchangeEvent::SendConfirmation).unwrap();

    let foreign = [1u8];
    match ex
        .process(ExchangeEvent::NewMsg(InboundMessage {
            msg_type: CoapMsgType::Con,
            code: 0x01,
            message_id: 0x3333,
            token: &foreign,
            block1: None,
            block2: None,
            is_request: true,
            payload: &[],
        }))
        .unwrap()
    {
        ExchangeAction::Send(msg) => {
            assert_eq!(msg.message_id, 0x3333);
            assert_eq!(msg.token.as_slice(), &foreign[..]);
        }
        other => panic!("expected 5.03 reply, got {other:?}"),
    }

    match ex
        .process(ExchangeEvent::NewMsg(InboundMessage {
            msg_type: CoapMsgType::Ack,
            code: 0x44,
            message_id: 1,
            token: own_token.as_slice(),
            block1: None,
            block2: None,
            is_request: false,
            payload: &[],
        }))
        .unwrap()
    {
        ExchangeAction::Done(ExchangeOutcome::Response(0x44)) => {}
        other => panic!("unexpected {other:?}"),
    }
}
