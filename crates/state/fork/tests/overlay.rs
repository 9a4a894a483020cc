use std::sync::Arc;

use forkdb_primitives::{address, bytes, Address, Bytecode, Bytes, KECCAK_EMPTY, U256};
use forkdb_state_api::{LocalState, StateBackend, StateCheckpoint};
use forkdb_state_fork::{
    ErrorPolicy, ForkedPersistentState, ForkedState, ForkedStateError, OverlayFault,
};
use forkdb_state_persistent::PersistentState;
use forkdb_state_remote::{
    test_utils::{MockRemoteSource, ProviderCall, RecordingProvider},
    CachedRemoteState, ForkedStateProvider, ForkedStateProviderFactory, ImportedAccount,
    RemoteStateError, RemoteStateProviderFactory,
};
use tokio::runtime;
use tokio_util::sync::CancellationToken;

const ALICE: Address = address!("0x0000000000000000000000000000000000000a11");
const BOB: Address = address!("0x0000000000000000000000000000000000000b0b");
const CONTRACT: Address = address!("0x00000000000000000000000000000000000c0de0");

type TestProvider = RecordingProvider<ForkedStateProvider<MockRemoteSource>>;
type TestState = ForkedPersistentState<TestProvider>;

struct Fixture {
    state: TestState,
    cache: Arc<CachedRemoteState<MockRemoteSource>>,
    cancellation: CancellationToken,
}

impl Fixture {
    fn new(source: MockRemoteSource, error_policy: ErrorPolicy) -> Self {
        let cancellation = CancellationToken::new();
        let factory = ForkedStateProviderFactory::new(CachedRemoteState::new(
            source,
            runtime::Handle::current(),
            cancellation.clone(),
        ));

        let provider = RecordingProvider::new(factory.new_provider());
        Self {
            state: ForkedState::with_provider(provider, error_policy),
            cache: factory.cache().clone(),
            cancellation,
        }
    }

    fn account_imports(&self, address: Address) -> usize {
        self.state.provider().account_imports(address)
    }

    fn storage_imports(&self, address: Address, index: U256) -> usize {
        self.state.provider().storage_imports(address, index)
    }
}

fn remote_source() -> MockRemoteSource {
    MockRemoteSource::default()
        .with_account(
            ALICE,
            ImportedAccount {
                balance: U256::from(100),
                nonce: 0,
                code: Bytes::new(),
            },
        )
        .with_account(
            CONTRACT,
            ImportedAccount {
                balance: U256::ZERO,
                nonce: 1,
                code: bytes!("6080604052"),
            },
        )
        .with_storage(ALICE, U256::from(1), U256::from(11))
        .with_storage(CONTRACT, U256::from(1), U256::from(42))
}

#[tokio::test(flavor = "multi_thread")]
async fn account_is_imported_once() -> anyhow::Result<()> {
    let mut fixture = Fixture::new(remote_source(), ErrorPolicy::FailSoft);
    let state = &mut fixture.state;

    assert_eq!(state.balance(ALICE)?, U256::from(100));
    assert_eq!(state.balance(ALICE)?, U256::from(100));
    assert_eq!(state.nonce(ALICE)?, 0);
    assert_eq!(state.code_hash(ALICE)?, KECCAK_EMPTY);
    assert_eq!(state.code_size(ALICE)?, 0);
    assert!(state.exists(ALICE)?);

    assert_eq!(fixture.account_imports(ALICE), 1);
    assert_eq!(fixture.cache.source().account_fetches(), 1);

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn contract_code_is_materialized() -> anyhow::Result<()> {
    let mut fixture = Fixture::new(remote_source(), ErrorPolicy::FailSoft);
    let state = &mut fixture.state;

    let code = bytes!("6080604052");
    assert_eq!(state.code(CONTRACT)?.original_bytes(), code);
    assert_eq!(state.code_size(CONTRACT)?, code.len());
    assert_eq!(
        state.code_hash(CONTRACT)?,
        Bytecode::new_raw(code).hash_slow()
    );
    assert_eq!(state.nonce(CONTRACT)?, 1);
    assert!(!state.is_empty(CONTRACT)?);

    assert_eq!(fixture.account_imports(CONTRACT), 1);

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn nonzero_slot_is_imported_once() -> anyhow::Result<()> {
    let mut fixture = Fixture::new(remote_source(), ErrorPolicy::FailSoft);
    let index = U256::from(1);

    assert_eq!(fixture.state.storage(ALICE, index)?, U256::from(11));
    assert_eq!(fixture.state.storage(ALICE, index)?, U256::from(11));
    assert_eq!(fixture.state.committed_storage(ALICE, index)?, U256::from(11));

    assert_eq!(fixture.storage_imports(ALICE, index), 1);
    assert_eq!(fixture.account_imports(ALICE), 1);

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn written_slot_is_read_back_locally() -> anyhow::Result<()> {
    let mut fixture = Fixture::new(remote_source(), ErrorPolicy::FailSoft);
    let index = U256::from(1);

    fixture.state.set_storage(ALICE, index, U256::from(5))?;
    assert_eq!(fixture.state.storage(ALICE, index)?, U256::from(5));

    assert_eq!(fixture.storage_imports(ALICE, index), 0);
    assert_eq!(fixture.cache.source().storage_fetches(), 0);

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn zero_slot_is_imported_on_every_read() -> anyhow::Result<()> {
    let mut fixture = Fixture::new(remote_source(), ErrorPolicy::FailSoft);
    let index = U256::from(2);

    assert_eq!(fixture.state.storage(ALICE, index)?, U256::ZERO);
    assert_eq!(
        fixture.state.local_state().storage_slot(ALICE, index),
        Some(U256::ZERO)
    );

    assert_eq!(fixture.state.storage(ALICE, index)?, U256::ZERO);
    assert_eq!(fixture.storage_imports(ALICE, index), 2);
    assert_eq!(fixture.cache.source().storage_fetches(), 1);

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn slot_conflict_yields_zero_without_failure() -> anyhow::Result<()> {
    let mut fixture = Fixture::new(remote_source(), ErrorPolicy::FailStrict);
    let index = U256::from(2);

    fixture.state.storage(ALICE, index)?;
    assert!(fixture.state.provider().inner().ledger().is_slot_dirty(&ALICE, &index));

    assert_eq!(fixture.state.storage(ALICE, index)?, U256::ZERO);
    assert!(fixture.state.session_errors().is_empty());
    assert_eq!(fixture.state.session_errors().failures(), 0);

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn locally_zeroed_slot_is_not_reimported() -> anyhow::Result<()> {
    let mut fixture = Fixture::new(remote_source(), ErrorPolicy::FailSoft);
    let index = U256::from(1);

    assert_eq!(fixture.state.storage(ALICE, index)?, U256::from(11));
    fixture.state.set_storage(ALICE, index, U256::ZERO)?;

    assert_eq!(fixture.state.storage(ALICE, index)?, U256::ZERO);
    assert_eq!(
        fixture.state.local_state().storage_slot(ALICE, index),
        Some(U256::ZERO)
    );
    assert_eq!(fixture.cache.source().storage_fetches(), 1);

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn revert_reopens_slot_import() -> anyhow::Result<()> {
    let mut fixture = Fixture::new(remote_source(), ErrorPolicy::FailSoft);
    let index = U256::from(1);

    fixture.state.balance(ALICE)?;

    let checkpoints: Vec<_> = (0..6).map(|_| fixture.state.checkpoint()).collect();
    assert_eq!(checkpoints, vec![0, 1, 2, 3, 4, 5]);

    fixture.state.set_storage(ALICE, index, U256::from(5))?;
    assert_eq!(fixture.state.storage(ALICE, index)?, U256::from(5));

    fixture.state.revert_to_checkpoint(3)?;

    assert_eq!(fixture.state.storage(ALICE, index)?, U256::from(11));
    assert_eq!(fixture.storage_imports(ALICE, index), 1);
    assert_eq!(fixture.account_imports(ALICE), 1);

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn revert_reopens_account_import() -> anyhow::Result<()> {
    let mut fixture = Fixture::new(remote_source(), ErrorPolicy::FailSoft);

    let checkpoint = fixture.state.checkpoint();
    assert_eq!(fixture.state.balance(ALICE)?, U256::from(100));
    fixture.state.set_balance(ALICE, U256::from(1))?;

    fixture.state.revert_to_checkpoint(checkpoint)?;
    assert!(fixture.state.local_state().account(ALICE)?.is_none());

    assert_eq!(fixture.state.balance(ALICE)?, U256::from(100));
    assert_eq!(fixture.account_imports(ALICE), 2);
    assert_eq!(fixture.cache.source().account_fetches(), 1);

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn marks_before_the_checkpoint_survive_revert() -> anyhow::Result<()> {
    let mut fixture = Fixture::new(remote_source(), ErrorPolicy::FailSoft);
    let index = U256::from(1);

    fixture.state.storage(ALICE, index)?;
    let checkpoint = fixture.state.checkpoint();
    fixture.state.set_storage(ALICE, index, U256::from(7))?;

    fixture.state.revert_to_checkpoint(checkpoint)?;

    assert_eq!(fixture.state.storage(ALICE, index)?, U256::from(11));
    assert_eq!(fixture.storage_imports(ALICE, index), 1);

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn slot_writes_are_idempotent() -> anyhow::Result<()> {
    let mut fixture = Fixture::new(remote_source(), ErrorPolicy::FailSoft);
    let index = U256::from(3);

    fixture.state.set_storage(ALICE, index, U256::from(1))?;
    let marks = fixture.state.provider().inner().ledger().len();

    fixture.state.set_storage(ALICE, index, U256::from(1))?;
    assert_eq!(fixture.state.provider().inner().ledger().len(), marks);

    let writes = fixture
        .state
        .provider()
        .calls()
        .iter()
        .filter(|call| matches!(call, ProviderCall::MarkSlotWritten { .. }))
        .count();
    assert_eq!(writes, 2);

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn imports_use_current_checkpoint() -> anyhow::Result<()> {
    let mut fixture = Fixture::new(remote_source(), ErrorPolicy::FailSoft);
    let index = U256::from(1);

    fixture.state.checkpoint();
    fixture.state.storage(ALICE, index)?;
    fixture.state.set_storage(ALICE, index, U256::from(2))?;

    assert_eq!(
        fixture.state.provider().calls(),
        [
            ProviderCall::ImportAccount {
                address: ALICE,
                checkpoint: 1,
            },
            ProviderCall::ImportStorage {
                address: ALICE,
                index,
                checkpoint: 1,
            },
            ProviderCall::MarkSlotWritten {
                address: ALICE,
                index,
                checkpoint: 1,
            },
        ]
    );

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn fail_soft_records_first_failure() -> anyhow::Result<()> {
    let source = remote_source().with_failure(BOB).with_failure(CONTRACT);
    let mut fixture = Fixture::new(source, ErrorPolicy::FailSoft);

    assert_eq!(fixture.state.balance(BOB)?, U256::ZERO);
    assert_eq!(fixture.state.code_size(CONTRACT)?, 0);
    assert_eq!(fixture.state.balance(ALICE)?, U256::from(100));

    let errors = fixture.state.take_session_errors();
    assert_eq!(errors.failures(), 2);
    assert_eq!(
        errors.first_failure().map(ToString::to_string),
        Some(format!("mock failure for {BOB}"))
    );
    assert!(fixture.state.session_errors().is_empty());

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn fail_soft_slot_failure_yields_zero() -> anyhow::Result<()> {
    let mut fixture = Fixture::new(remote_source().with_failure(ALICE), ErrorPolicy::FailSoft);
    let index = U256::from(1);

    assert_eq!(fixture.state.storage(ALICE, index)?, U256::ZERO);
    assert_eq!(fixture.state.local_state().storage_slot(ALICE, index), None);

    let (_local, errors) = fixture.state.finish();
    assert_eq!(errors.failures(), 2);
    assert!(errors.into_result().is_err());

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn fail_strict_materializes_default_before_failing() -> anyhow::Result<()> {
    let mut fixture = Fixture::new(remote_source().with_failure(BOB), ErrorPolicy::FailStrict);

    let result = fixture.state.balance(BOB);
    assert!(matches!(
        result,
        Err(ForkedStateError::Remote(RemoteStateError::Other(_)))
    ));

    let account_info = fixture
        .state
        .local_state()
        .account(BOB)?
        .expect("default account is materialized");
    assert!(account_info.is_empty());
    assert!(fixture.state.session_errors().is_empty());

    // The account is materialized, so execution can continue.
    assert_eq!(fixture.state.balance(BOB)?, U256::ZERO);
    assert_eq!(fixture.account_imports(BOB), 1);

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn cancellation_is_never_recorded() -> anyhow::Result<()> {
    for error_policy in [ErrorPolicy::FailSoft, ErrorPolicy::FailStrict] {
        let mut fixture = Fixture::new(remote_source(), error_policy);
        fixture.cancellation.cancel();

        assert_eq!(fixture.state.balance(ALICE)?, U256::ZERO);
        assert_eq!(fixture.state.storage(ALICE, U256::from(1))?, U256::ZERO);

        let errors = fixture.state.session_errors();
        assert!(errors.is_empty());
        assert_eq!(errors.cancellations(), 2);
        assert_eq!(fixture.cache.source().account_fetches(), 0);
    }

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_revert_leaves_ledger_untouched() -> anyhow::Result<()> {
    let mut fixture = Fixture::new(remote_source(), ErrorPolicy::FailSoft);

    let checkpoint = fixture.state.checkpoint();
    fixture.state.balance(ALICE)?;

    let result = fixture.state.revert_to_checkpoint(checkpoint + 1);
    assert!(matches!(result, Err(ForkedStateError::Local(_))));

    assert!(fixture.state.provider().inner().ledger().is_account_dirty(&ALICE));
    assert!(
        !fixture
            .state
            .provider()
            .calls()
            .iter()
            .any(|call| matches!(call, ProviderCall::NotifyReverted(_)))
    );

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn populating_twice_is_a_fault() -> anyhow::Result<()> {
    let mut fixture = Fixture::new(remote_source(), ErrorPolicy::FailSoft);

    fixture.state.populate_account(ALICE)?;

    let result = fixture.state.populate_account(ALICE);
    assert!(matches!(
        result,
        Err(ForkedStateError::Fault(OverlayFault::AccountAlreadyMaterialized(address)))
            if address == ALICE
    ));

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn populating_slot_without_account_is_a_fault() -> anyhow::Result<()> {
    let mut fixture = Fixture::new(remote_source(), ErrorPolicy::FailSoft);

    let result = fixture.state.populate_slot(ALICE, U256::from(1));
    assert!(matches!(
        result,
        Err(ForkedStateError::Fault(OverlayFault::SlotWithoutAccount { address, .. }))
            if address == ALICE
    ));
    assert_eq!(fixture.storage_imports(ALICE, U256::from(1)), 0);

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn deployed_contract_has_empty_remote_storage() -> anyhow::Result<()> {
    let mut fixture = Fixture::new(remote_source(), ErrorPolicy::FailSoft);
    let index = U256::from(1);

    let checkpoint = fixture.state.checkpoint();
    fixture
        .state
        .set_code(ALICE, Bytecode::new_raw(bytes!("60016000")))?;

    assert_eq!(fixture.state.storage(ALICE, index)?, U256::ZERO);
    assert_eq!(fixture.cache.source().storage_fetches(), 0);

    fixture.state.revert_to_checkpoint(checkpoint)?;
    assert!(!fixture.state.provider().inner().ledger().is_contract_deployed(&ALICE));

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn replacing_code_keeps_remote_storage() -> anyhow::Result<()> {
    let mut fixture = Fixture::new(remote_source(), ErrorPolicy::FailSoft);

    fixture
        .state
        .set_code(CONTRACT, Bytecode::new_raw(bytes!("60016000")))?;

    assert_eq!(fixture.state.storage(CONTRACT, U256::from(1))?, U256::from(42));
    assert!(
        !fixture
            .state
            .provider()
            .calls()
            .iter()
            .any(|call| matches!(call, ProviderCall::MarkContractDeployed { .. }))
    );

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn delegation_keeps_remote_storage() -> anyhow::Result<()> {
    let mut fixture = Fixture::new(remote_source(), ErrorPolicy::FailSoft);

    let delegation = Bytecode::new_eip7702(BOB);
    assert!(delegation.is_eip7702());
    fixture.state.set_code(ALICE, delegation)?;

    assert_eq!(fixture.state.storage(ALICE, U256::from(1))?, U256::from(11));
    assert!(!fixture.state.provider().inner().ledger().is_contract_deployed(&ALICE));
    assert_eq!(fixture.cache.source().storage_fetches(), 1);

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn destroyed_account_is_resynthesized_empty() -> anyhow::Result<()> {
    let mut fixture = Fixture::new(remote_source(), ErrorPolicy::FailStrict);

    assert_eq!(fixture.state.balance(ALICE)?, U256::from(100));
    fixture.state.self_destruct(ALICE)?;
    fixture.state.finalize();
    assert!(fixture.state.local_state().account(ALICE)?.is_none());

    assert_eq!(fixture.state.balance(ALICE)?, U256::ZERO);
    assert!(fixture.state.is_empty(ALICE)?);
    assert!(!fixture.state.has_self_destructed(ALICE)?);
    assert_eq!(fixture.account_imports(ALICE), 2);
    assert_eq!(fixture.cache.source().account_fetches(), 1);
    assert!(fixture.state.session_errors().is_empty());

    // Slots were never imported in this epoch, so they still come from remote.
    assert_eq!(fixture.state.storage(ALICE, U256::from(1))?, U256::from(11));
    assert_eq!(fixture.storage_imports(ALICE, U256::from(1)), 1);

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_account_exists_when_empty() -> anyhow::Result<()> {
    let mut fixture = Fixture::new(remote_source(), ErrorPolicy::FailSoft);

    assert!(fixture.state.exists(BOB)?);
    assert!(fixture.state.is_empty(BOB)?);
    assert!(fixture.state.local_state().account(BOB)?.is_some());

    assert!(!fixture.state.is_empty(ALICE)?);

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn self_destruct_is_local_only() -> anyhow::Result<()> {
    let mut fixture = Fixture::new(remote_source(), ErrorPolicy::FailSoft);

    assert!(!fixture.state.has_self_destructed(ALICE)?);
    assert_eq!(fixture.account_imports(ALICE), 0);

    fixture.state.self_destruct(ALICE)?;
    assert!(fixture.state.has_self_destructed(ALICE)?);
    assert_eq!(fixture.account_imports(ALICE), 1);

    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn workers_have_independent_epochs() -> anyhow::Result<()> {
    let factory = ForkedStateProviderFactory::new(CachedRemoteState::new(
        remote_source(),
        runtime::Handle::current(),
        CancellationToken::new(),
    ));
    let index = U256::from(1);

    let mut first: TestState = ForkedState::with_provider(
        RecordingProvider::new(factory.new_provider()),
        ErrorPolicy::FailSoft,
    );
    let mut second: TestState = ForkedState::with_provider(
        RecordingProvider::new(factory.new_provider()),
        ErrorPolicy::FailSoft,
    );

    first.set_storage(ALICE, index, U256::from(3))?;

    assert_eq!(second.storage(ALICE, index)?, U256::from(11));
    assert_eq!(first.storage(ALICE, index)?, U256::from(3));
    assert_eq!(factory.cache().source().account_fetches(), 1);

    Ok(())
}

/// Drives the same operations through a plain and a forked backend.
fn exercise<StateT: StateBackend>(
    state: &mut StateT,
) -> Result<(U256, U256, u64), StateT::Error> {
    let checkpoint = state.checkpoint();
    state.add_balance(BOB, U256::from(10))?;
    state.set_nonce(BOB, 4)?;
    state.set_storage(BOB, U256::from(9), U256::from(8))?;
    let storage = state.storage(BOB, U256::from(9))?;

    state.revert_to_checkpoint(checkpoint)?;
    state.set_balance(BOB, U256::from(2))?;
    state.sub_balance(BOB, U256::from(1))?;

    Ok((state.balance(BOB)?, storage, state.nonce(BOB)?))
}

#[tokio::test(flavor = "multi_thread")]
async fn backends_are_substitutable() -> anyhow::Result<()> {
    let mut plain = PersistentState::default();
    let mut fixture = Fixture::new(remote_source(), ErrorPolicy::FailSoft);

    let expected = (U256::from(1), U256::from(8), 0);
    assert_eq!(exercise(&mut plain)?, expected);
    assert_eq!(exercise(&mut fixture.state)?, expected);

    Ok(())
}
