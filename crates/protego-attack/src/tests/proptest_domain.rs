//! Every per-step image stays inside its architecture's domain.

use super::support::dense_model;
use crate::attack::Attack;
use crate::signal::{AnalyticGradient, DirectionalSignal, NesSignal};
use crate::strategy::descriptor;
use crate::NesConfig;
use proptest::prelude::*;
use protego_core::{Architecture, AttackFamily};
use protego_tensor::WorkingImage;
use rand::rngs::StdRng;
use rand::SeedableRng;

fn architecture() -> impl Strategy<Value = Architecture> {
    prop_oneof![
        Just(Architecture::ResNet),
        Just(Architecture::MobileNet),
        Just(Architecture::EfficientNet),
    ]
}

fn family() -> impl Strategy<Value = AttackFamily> {
    prop_oneof![Just(AttackFamily::ScoreBased), Just(AttackFamily::BoundaryBased)]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_every_iteration_stays_in_domain(
        arch in architecture(),
        family in family(),
        model_seed in 0_u64..1000,
        image_seed in any::<u64>(),
        target in 0_usize..3,
        estimated in any::<bool>(),
    ) {
        let model = dense_model(arch, (4, 4, 3), 3, model_seed);
        let analytic = AnalyticGradient;
        let nes = NesSignal::new(NesConfig { samples: 4, sigma: 0.3 * arch.domain().width() });
        let signal: &dyn DirectionalSignal = if estimated { &nes } else { &analytic };

        let mut rng = StdRng::seed_from_u64(image_seed);
        let seed = WorkingImage::uniform(4, 4, arch.domain(), &mut rng);
        let strategy = descriptor(arch, family).with_budget(30);

        let mut steps = 0;
        let mut violations = Vec::new();
        let outcome = Attack::new(strategy, &model)
            .with_signal(signal)
            .run_observed(seed, target, &mut rng, |i, image| {
                steps += 1;
                if !image.is_within_domain() {
                    violations.push(i);
                }
            })
            .unwrap();

        prop_assert_eq!(steps, 30);
        prop_assert!(violations.is_empty(), "left the domain at iterations {:?}", violations);
        prop_assert!(outcome.image.is_within_domain());
    }
}
