use std::{
    any::TypeId,
    cmp::Reverse,
    collections::{BinaryHeap, HashMap, HashSet},
    sync::Arc,
};

use tracing::debug;

use crate::{
    any::TypeInfo,
    collection::FlatEntry,
    errors::{BindErrorKind, RunErrorKind},
    matcher::{Pool, Source},
    provider::{Body, BodyFn, Kind},
};

/// Everything the planner needs for one `bind` call: the flattened pool and
/// the caller's external signatures.
pub(crate) struct PlanInput<'a> {
    pub(crate) entries: &'a [FlatEntry],
    pub(crate) init_args: &'a [TypeInfo],
    pub(crate) init_rets: &'a [TypeInfo],
    pub(crate) invoke_args: &'a [TypeInfo],
    pub(crate) invoke_rets: &'a [TypeInfo],
}

/// One executable step of the validated chain.
pub(crate) struct Step {
    pub(crate) name: Arc<str>,
    pub(crate) body: Body,
}

/// The validated, ordered, partitioned chain. Steps are laid out in
/// execution order: the static segment first, then the run segment.
pub(crate) struct ResolvedPlan {
    pub(crate) steps: Vec<Step>,
    pub(crate) static_len: usize,
    pub(crate) terminal_outputs: Vec<TypeInfo>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Consumer {
    Provider(usize),
    /// The caller's invoke/init result signature.
    External,
}

type Consumption = HashMap<(usize, TypeId), Vec<Consumer>>;

/// Who currently gets consulted for each input, per provider and slot.
type Resolution = HashMap<(usize, usize), Source>;

enum Node {
    Provider(usize),
    Coercion { producer: usize, target: TypeInfo },
}

/// Builds the validated execution plan, or the full list of wiring defects.
pub(crate) fn plan(input: &PlanInput<'_>) -> Result<ResolvedPlan, Vec<BindErrorKind>> {
    let entries = input.entries;
    if entries.is_empty() {
        return Err(vec![BindErrorKind::MalformedSignature {
            detail: "the collection contains no providers".to_string(),
        }]);
    }
    let terminal = entries.len() - 1;
    if entries[terminal].provider.kind == Kind::Wrapper {
        return Err(vec![BindErrorKind::MalformedSignature {
            detail: format!(
                "terminal provider `{}` is a wrapper; a chain must end in a function",
                entries[terminal].name
            ),
        }]);
    }

    let mut errors = Vec::new();
    for entry in entries {
        for coercion in &entry.provider.coercions {
            if !entry.provider.outputs.contains(&coercion.source) {
                errors.push(BindErrorKind::MalformedSignature {
                    detail: format!(
                        "`{}` declares a coercion from {}, which it does not produce",
                        entry.name, coercion.source
                    ),
                });
            }
        }
    }

    let pool = Pool {
        entries,
        invoke_args: input.invoke_args,
        init_args: input.init_args,
        terminal: Some(terminal),
    };

    let (included, consumption) = inclusion_fixpoint(&pool, input, terminal);

    // Defects on the survivors. Everything droppable was already dropped,
    // so whatever is still unmet, ambiguous, or unconsumed here is final.
    let mut resolution: Resolution = HashMap::new();
    for (i, entry) in entries.iter().enumerate() {
        if !included[i] {
            continue;
        }
        let provider = &entry.provider;
        if provider.flags.must_cache && provider.flags.not_cacheable {
            errors.push(BindErrorKind::ConflictingCacheFlags {
                provider: entry.name.clone(),
            });
        }
        for (slot, needed) in provider.inputs.iter().enumerate() {
            match pool.find_producer(i, *needed, &included) {
                Ok(Some(source)) => {
                    resolution.insert((i, slot), source);
                }
                Ok(None) => errors.push(BindErrorKind::UnmetDependency {
                    consumer: entry.name.clone(),
                    position: Some(i),
                    needed: *needed,
                }),
                Err(err) => errors.push(err),
            }
        }
        if provider.flags.must_consume && provider.flags.required {
            for output in provider.outputs.iter() {
                if !consumption.contains_key(&(i, output.id)) {
                    errors.push(BindErrorKind::UnconsumedOutput {
                        provider: entry.name.clone(),
                        output: *output,
                    });
                }
            }
        }
        if provider.kind == Kind::Wrapper && provider.flags.required && !provider.flags.consumption_optional {
            for returned in provider.returns.iter() {
                if !up_consumed(entries, &included, i, *returned, input.invoke_rets) {
                    errors.push(BindErrorKind::UnconsumedOutput {
                        provider: entry.name.clone(),
                        output: *returned,
                    });
                }
            }
        }
    }

    // Every downward-available type id, for the upward-flow fallback.
    let downward: HashSet<TypeId> = input
        .init_args
        .iter()
        .chain(input.invoke_args)
        .map(|info| info.id)
        .chain(entries.iter().enumerate().filter(|(i, _)| included[*i]).flat_map(|(_, entry)| {
            entry
                .provider
                .outputs
                .iter()
                .map(|info| info.id)
                .chain(entry.provider.coercions.iter().map(|coercion| coercion.target.id))
        }))
        .collect();

    for (i, entry) in entries.iter().enumerate() {
        if !included[i] || entry.provider.kind != Kind::Wrapper {
            continue;
        }
        let mut upward: HashSet<TypeId> = entries[terminal].provider.outputs.iter().map(|info| info.id).collect();
        for (inner, other) in entries.iter().enumerate() {
            if included[inner] && inner > i && other.provider.kind == Kind::Wrapper {
                upward.extend(other.provider.returns.iter().map(|info| info.id));
            }
        }
        for needed in entry.provider.ups.iter() {
            if !upward.contains(&needed.id) && !downward.contains(&needed.id) {
                errors.push(BindErrorKind::UnmetDependency {
                    consumer: entry.name.clone(),
                    position: Some(i),
                    needed: *needed,
                });
            }
        }
    }

    let mut all_upward: HashSet<TypeId> = entries[terminal].provider.outputs.iter().map(|info| info.id).collect();
    for (i, entry) in entries.iter().enumerate() {
        if included[i] && entry.provider.kind == Kind::Wrapper {
            all_upward.extend(entry.provider.returns.iter().map(|info| info.id));
        }
    }
    for needed in input.invoke_rets {
        if !all_upward.contains(&needed.id) && !downward.contains(&needed.id) {
            errors.push(BindErrorKind::UnmetDependency {
                consumer: Arc::from("invoke signature"),
                position: None,
                needed: *needed,
            });
        }
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    // Linearization over providers plus one synthetic node per used
    // coercion, so a coerced value materializes right after its producer.
    let mut nodes: Vec<Node> = Vec::new();
    let mut provider_node: HashMap<usize, usize> = HashMap::new();
    for (i, _) in entries.iter().enumerate().filter(|(i, _)| included[*i]) {
        provider_node.insert(i, nodes.len());
        nodes.push(Node::Provider(i));
    }
    let mut coercion_node: HashMap<(usize, TypeId), usize> = HashMap::new();
    for ((consumer, slot), source) in &resolution {
        if let Source::Coerced(producer) = source {
            let target = entries[*consumer].provider.inputs[*slot];
            coercion_node.entry((*producer, target.id)).or_insert_with(|| {
                nodes.push(Node::Coercion {
                    producer: *producer,
                    target,
                });
                nodes.len() - 1
            });
        }
    }

    let mut edges: HashSet<(usize, usize)> = HashSet::new();
    for ((consumer, slot), source) in &resolution {
        let consumer_node = provider_node[consumer];
        match source {
            Source::Step(producer) => {
                edges.insert((provider_node[producer], consumer_node));
            }
            Source::Coerced(producer) => {
                let target = entries[*consumer].provider.inputs[*slot];
                let via = coercion_node[&(*producer, target.id)];
                edges.insert((provider_node[producer], via));
                edges.insert((via, consumer_node));
            }
            Source::InvokeArg(_) | Source::InitArg(_) => {}
        }
    }

    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
    let mut indegree: Vec<usize> = vec![0; nodes.len()];
    for (from, to) in &edges {
        successors[*from].push(*to);
        indegree[*to] += 1;
    }

    // Stable topological order: among ready nodes, declaration position
    // wins, which keeps the caller's sequence wherever edges permit and
    // leaves the terminal last.
    let order_key = |node: &Node| match node {
        Node::Provider(i) => (*i, 0_u8, None),
        Node::Coercion { producer, target } => (*producer, 1_u8, Some(*target)),
    };
    let mut ready: BinaryHeap<Reverse<((usize, u8, Option<TypeInfo>), usize)>> = indegree
        .iter()
        .enumerate()
        .filter(|(_, degree)| **degree == 0)
        .map(|(index, _)| Reverse((order_key(&nodes[index]), index)))
        .collect();
    let mut order: Vec<usize> = Vec::with_capacity(nodes.len());
    let mut remaining = indegree.clone();
    while let Some(Reverse((_, index))) = ready.pop() {
        order.push(index);
        for &next in &successors[index] {
            remaining[next] -= 1;
            if remaining[next] == 0 {
                ready.push(Reverse((order_key(&nodes[next]), next)));
            }
        }
    }
    if order.len() < nodes.len() {
        let placed: HashSet<usize> = order.iter().copied().collect();
        let unplaced = (0..nodes.len())
            .filter(|index| !placed.contains(index))
            .map(|index| node_name(entries, &nodes[index]))
            .collect();
        return Err(vec![BindErrorKind::Cycle { unplaced }]);
    }

    // Partition. A node joins the static segment only when its kind allows
    // it and every one of its inputs is available at initialization time.
    let mut is_static = vec![false; nodes.len()];
    for &index in &order {
        match &nodes[index] {
            Node::Provider(i) => {
                let provider = &entries[*i].provider;
                if *i == terminal || provider.kind == Kind::Wrapper || provider.flags.not_cacheable {
                    continue;
                }
                if !(provider.flags.cacheable || provider.flags.memoize || provider.kind == Kind::Instance) {
                    continue;
                }
                // An input that resolved to an invoke parameter can still be
                // served statically when an init parameter carries the same
                // type; re-pin it so the step keeps its cacheable placement.
                let mut repinned: Vec<(usize, usize)> = Vec::new();
                let sources_ready = (0..provider.inputs.len()).all(|slot| match resolution.get(&(*i, slot)) {
                    Some(Source::InitArg(_)) => true,
                    Some(Source::Step(j)) => is_static[provider_node[j]],
                    Some(Source::Coerced(j)) => {
                        let target = provider.inputs[slot];
                        is_static[coercion_node[&(*j, target.id)]]
                    }
                    Some(Source::InvokeArg(_)) => {
                        let needed = provider.inputs[slot];
                        match input.init_args.iter().position(|info| *info == needed) {
                            Some(init_slot) => {
                                repinned.push((slot, init_slot));
                                true
                            }
                            None => false,
                        }
                    }
                    None => false,
                });
                if sources_ready {
                    for (slot, init_slot) in repinned {
                        resolution.insert((*i, slot), Source::InitArg(init_slot));
                    }
                }
                is_static[index] = sources_ready;
            }
            Node::Coercion { producer, .. } => {
                is_static[index] = is_static[provider_node[producer]];
            }
        }
    }
    for (i, entry) in entries.iter().enumerate() {
        if included[i] && entry.provider.flags.must_cache && !is_static[provider_node[&i]] {
            errors.push(BindErrorKind::InvalidCachePlacement {
                provider: entry.name.clone(),
            });
        }
    }

    let static_order: Vec<usize> = order.iter().copied().filter(|index| is_static[*index]).collect();
    let run_order: Vec<usize> = order.iter().copied().filter(|index| !is_static[*index]).collect();

    // Shadow check: replay the execution order and verify each consumer
    // actually observes the producer the resolution promised. The frame
    // keeps the latest value per type, so a reordering that slips another
    // producer in between changes behavior and must be rejected.
    let mut latest: HashMap<TypeId, Source> = HashMap::new();
    let seed_args = |latest: &mut HashMap<TypeId, Source>, args: &[TypeInfo], make: fn(usize) -> Source| {
        let mut seen = HashSet::new();
        for (slot, info) in args.iter().enumerate() {
            if seen.insert(info.id) {
                latest.insert(info.id, make(slot));
            }
        }
    };
    seed_args(&mut latest, input.init_args, Source::InitArg);
    let replay = |index: usize, latest: &mut HashMap<TypeId, Source>, errors: &mut Vec<BindErrorKind>| {
        match &nodes[index] {
            Node::Provider(i) => {
                let provider = &entries[*i].provider;
                for (slot, needed) in provider.inputs.iter().enumerate() {
                    let Some(resolved) = resolution.get(&(*i, slot)) else { continue };
                    let observed = latest.get(&needed.id).copied();
                    if observed != Some(*resolved) {
                        errors.push(BindErrorKind::AmbiguousResolution {
                            consumer: entries[*i].name.clone(),
                            needed: *needed,
                            candidates: vec![
                                source_name(entries, input, *resolved),
                                observed.map_or_else(|| "nothing".to_string(), |seen| source_name(entries, input, seen)),
                            ],
                        });
                    }
                }
                for output in provider.outputs.iter() {
                    latest.insert(output.id, Source::Step(*i));
                }
            }
            Node::Coercion { producer, target } => {
                latest.insert(target.id, Source::Coerced(*producer));
            }
        }
    };
    for &index in &static_order {
        replay(index, &mut latest, &mut errors);
    }
    seed_args(&mut latest, input.invoke_args, Source::InvokeArg);
    for &index in &run_order {
        replay(index, &mut latest, &mut errors);
    }

    // The initializer's results can only come out of the static segment.
    let mut static_types: HashSet<TypeId> = input.init_args.iter().map(|info| info.id).collect();
    for &index in &static_order {
        match &nodes[index] {
            Node::Provider(i) => static_types.extend(entries[*i].provider.outputs.iter().map(|info| info.id)),
            Node::Coercion { target, .. } => {
                static_types.insert(target.id);
            }
        }
    }
    for needed in input.init_rets {
        if !static_types.contains(&needed.id) {
            errors.push(BindErrorKind::UnmetDependency {
                consumer: Arc::from("init signature"),
                position: None,
                needed: *needed,
            });
        }
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    let mut steps = Vec::with_capacity(nodes.len());
    for &index in static_order.iter().chain(&run_order) {
        match &nodes[index] {
            Node::Provider(i) => steps.push(Step {
                name: entries[*i].name.clone(),
                body: entries[*i].provider.body.clone(),
            }),
            Node::Coercion { producer, target } => {
                let Some(found) = entries[*producer]
                    .provider
                    .coercions
                    .iter()
                    .find(|coercion| coercion.target == *target)
                else {
                    continue;
                };
                let source = found.source;
                let target = found.target;
                let convert = found.convert.clone();
                let body: BodyFn = Arc::new(move |frame, _label| {
                    let value = frame
                        .get_raw(&source.id)
                        .ok_or(RunErrorKind::MissingValue { needed: source })?;
                    let converted = convert(&value).ok_or(RunErrorKind::MissingValue { needed: target })?;
                    frame.insert_raw(target, converted);
                    Ok(())
                });
                steps.push(Step {
                    name: Arc::from(format!("{} as {}", entries[*producer].name, target)),
                    body: Body::Call(body),
                });
            }
        }
    }

    debug!(
        static_steps = static_order.len(),
        run_steps = run_order.len(),
        "Chain planned"
    );
    Ok(ResolvedPlan {
        steps,
        static_len: static_order.len(),
        terminal_outputs: entries[terminal].provider.outputs.to_vec(),
    })
}

/// Repeatedly drops providers that cannot or need not run until the pool
/// stabilizes. Returns the survivors and the final consumption map.
fn inclusion_fixpoint(pool: &Pool<'_>, input: &PlanInput<'_>, terminal: usize) -> (Vec<bool>, Consumption) {
    let entries = pool.entries;
    let mut included = vec![true; entries.len()];
    loop {
        let (consumption, unmet) = mark_consumption(pool, input, &included, terminal);
        let mut drops = vec![false; entries.len()];

        for (i, entry) in entries.iter().enumerate() {
            if !included[i] || i == terminal {
                continue;
            }
            let provider = &entry.provider;
            if provider.flags.required {
                continue;
            }
            if unmet[i] {
                debug!(provider = %entry.name, "Dropping provider: unmet input");
                drops[i] = true;
                continue;
            }
            if provider.kind == Kind::Wrapper
                && !provider.flags.consumption_optional
                && provider
                    .returns
                    .iter()
                    .any(|t| !up_consumed(entries, &included, i, *t, input.invoke_rets))
            {
                debug!(provider = %entry.name, "Dropping wrapper: upward return unconsumed");
                drops[i] = true;
                continue;
            }
            if provider.flags.must_consume
                && provider.outputs.iter().any(|t| !consumption.contains_key(&(i, t.id)))
            {
                debug!(provider = %entry.name, "Dropping provider: must_consume output unconsumed");
                drops[i] = true;
                continue;
            }
            let no_output = provider.outputs.is_empty() && provider.returns.is_empty();
            let tolerated_wrapper = provider.kind == Kind::Wrapper && provider.flags.consumption_optional;
            if no_output || provider.flags.desired || tolerated_wrapper {
                continue;
            }
            let any_consumed = provider.outputs.iter().any(|t| consumption.contains_key(&(i, t.id)))
                || provider
                    .returns
                    .iter()
                    .any(|t| up_consumed(entries, &included, i, *t, input.invoke_rets));
            if !any_consumed {
                debug!(provider = %entry.name, "Dropping provider: no output consumed");
                drops[i] = true;
            }
        }

        // Cluster atomicity: a cluster stays only when one of its outputs
        // is consumed beyond the cluster itself (the terminal counts as
        // outside), or a member forces inclusion.
        let mut live_clusters: HashSet<u64> = HashSet::new();
        for (i, entry) in entries.iter().enumerate() {
            let Some(cluster) = entry.cluster else { continue };
            if !included[i] || drops[i] {
                continue;
            }
            if entry.provider.flags.required {
                live_clusters.insert(cluster);
                continue;
            }
            let consumed_outside = entry.provider.outputs.iter().any(|t| {
                consumption.get(&(i, t.id)).is_some_and(|consumers| {
                    consumers.iter().any(|consumer| match consumer {
                        Consumer::External => true,
                        Consumer::Provider(k) => *k == terminal || entries[*k].cluster != Some(cluster),
                    })
                })
            });
            if consumed_outside {
                live_clusters.insert(cluster);
            }
        }
        for (i, entry) in entries.iter().enumerate() {
            if i == terminal || !included[i] || drops[i] {
                continue;
            }
            if let Some(cluster) = entry.cluster {
                if !live_clusters.contains(&cluster) {
                    debug!(provider = %entry.name, "Dropping provider: cluster unused");
                    drops[i] = true;
                }
            }
        }

        if !drops.iter().any(|dropped| *dropped) {
            return (included, consumption);
        }
        for (flag, dropped) in included.iter_mut().zip(&drops) {
            if *dropped {
                *flag = false;
            }
        }
    }
}

/// Resolves every included input once and records which producer outputs
/// end up consumed, and by whom. Also flags providers with unmet inputs.
///
/// A consumer that reproduces the very type it consumes only counts as a
/// consumer once its own copy is consumed; the terminal always counts.
fn mark_consumption(
    pool: &Pool<'_>,
    input: &PlanInput<'_>,
    included: &[bool],
    terminal: usize,
) -> (Consumption, Vec<bool>) {
    let entries = pool.entries;
    let mut unmet = vec![false; entries.len()];
    let mut consumption: Consumption = HashMap::new();
    let mut raw: Vec<(usize, TypeInfo, usize)> = Vec::new();

    for (i, entry) in entries.iter().enumerate() {
        if !included[i] {
            continue;
        }
        for needed in entry.provider.inputs.iter() {
            match pool.find_producer(i, *needed, included) {
                Ok(Some(Source::Step(producer))) => raw.push((producer, *needed, i)),
                Ok(Some(Source::Coerced(producer))) => {
                    if let Some(coercion) = entries[producer]
                        .provider
                        .coercions
                        .iter()
                        .find(|coercion| coercion.target == *needed)
                    {
                        raw.push((producer, coercion.source, i));
                    }
                }
                Ok(Some(Source::InvokeArg(_) | Source::InitArg(_))) => {}
                Ok(None) => unmet[i] = true,
                // Ambiguity pins every candidate in place so it survives to
                // be reported, instead of decaying into cascading drops.
                Err(_) => {
                    for (candidate, _) in entries.iter().enumerate() {
                        if candidate != i
                            && included[candidate]
                            && (pool.produces_exact(candidate, *needed) || pool.produces_loose(candidate, *needed))
                        {
                            for output in entries[candidate].provider.outputs.iter() {
                                consumption
                                    .entry((candidate, output.id))
                                    .or_default()
                                    .push(Consumer::Provider(i));
                            }
                        }
                    }
                }
            }
        }
    }

    // The caller's result signatures keep the newest producer of each
    // requested type alive for the downward-fallback extraction.
    for needed in input.invoke_rets.iter().chain(input.init_rets) {
        if let Some(producer) = (0..entries.len())
            .rev()
            .find(|&j| included[j] && pool.produces_exact(j, *needed))
        {
            consumption.entry((producer, needed.id)).or_default().push(Consumer::External);
        }
    }

    loop {
        let mut changed = false;
        for &(producer, needed, consumer) in &raw {
            let counts = consumer == terminal
                || !entries[consumer].provider.outputs.contains(&needed)
                || consumption.contains_key(&(consumer, needed.id));
            if counts {
                let consumers = consumption.entry((producer, needed.id)).or_default();
                if !consumers.contains(&Consumer::Provider(consumer)) {
                    consumers.push(Consumer::Provider(consumer));
                    changed = true;
                }
            }
        }
        if !changed {
            break;
        }
    }

    (consumption, unmet)
}

/// Whether the upward return `needed` of the wrapper at `index` is picked
/// up by an enclosing wrapper or by the caller's invoke signature.
fn up_consumed(
    entries: &[FlatEntry],
    included: &[bool],
    index: usize,
    needed: TypeInfo,
    invoke_rets: &[TypeInfo],
) -> bool {
    invoke_rets.contains(&needed)
        || entries.iter().enumerate().any(|(outer, entry)| {
            included[outer]
                && outer < index
                && entry.provider.kind == Kind::Wrapper
                && entry.provider.ups.contains(&needed)
        })
}

fn node_name(entries: &[FlatEntry], node: &Node) -> String {
    match node {
        Node::Provider(i) => entries[*i].name.to_string(),
        Node::Coercion { producer, target } => format!("{} as {}", entries[*producer].name, target),
    }
}

fn source_name(entries: &[FlatEntry], input: &PlanInput<'_>, source: Source) -> String {
    match source {
        Source::Step(i) => format!("`{}`", entries[i].name),
        Source::Coerced(i) => format!("`{}` (loose)", entries[i].name),
        Source::InvokeArg(slot) => format!("invoke parameter {} ({})", slot, input.invoke_args[slot]),
        Source::InitArg(slot) => format!("init parameter {} ({})", slot, input.init_args[slot]),
    }
}
