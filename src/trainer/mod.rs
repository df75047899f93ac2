//! Minimal drivers running pre-training and supervised fine-tuning epochs.

pub mod logger;

pub use logger::{LogFile, Logger, MockLogger, TracingLogger};

use rand::rngs::SmallRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::info;

use crate::{
    config::TrainingConfig,
    data::{DataBlock, Shape},
    error::{Error, Result},
    network::{Ffcnn, Network, Scae},
};

/// Checks that every image can hold the input region of the network.
fn check_images<'a, I: Iterator<Item = &'a DataBlock>>(images: I, input: Shape) -> Result<()> {
    let mut empty = true;
    for image in images {
        empty = false;
        let shape = image.shape();
        if shape.width < input.width || shape.height < input.height || shape.depth != input.depth {
            return Err(Error::config(format!(
                "a {} image cannot hold the {} input of the network",
                shape, input
            )));
        }
    }
    if empty {
        return Err(Error::Empty("training images"));
    }
    Ok(())
}

/// Layer-wise unsupervised pre-training of the top unit of a [Scae] on random
/// patches of a set of images.
#[derive(Debug)]
pub struct Pretrainer {
    config: TrainingConfig,
    logger: Box<dyn Logger>,
    rng: SmallRng,
}

impl Pretrainer {
    pub fn new(config: TrainingConfig, logger: Box<dyn Logger>) -> Self {
        let rng = SmallRng::seed_from_u64(config.seed);
        Self { config, logger, rng }
    }

    /// Random corner of a region of `input` inside `image`.
    fn origin(&mut self, image: &DataBlock, input: Shape) -> (usize, usize) {
        let x = self.rng.gen_range(0, image.width() - input.width + 1);
        let y = self.rng.gen_range(0, image.height() - input.height + 1);
        (x, y)
    }

    /// Trains on unlabelled images and ends the pre-training phase.
    /// Returns the loss of the last epoch.
    pub fn run(&mut self, scae: &mut Scae, images: &[DataBlock]) -> Result<f32> {
        check_images(images.iter(), scae.input_shape())?;
        self.epochs(scae, images.len(), |i| (&images[i], None))
    }

    /// Same as [run](Self::run) for units which need the class of every sample.
    pub fn run_labelled(&mut self, scae: &mut Scae, samples: &[(DataBlock, usize)]) -> Result<f32> {
        check_images(samples.iter().map(|(image, _)| image), scae.input_shape())?;
        self.epochs(scae, samples.len(), |i| (&samples[i].0, Some(samples[i].1)))
    }

    fn epochs<'a, F>(&mut self, scae: &mut Scae, count: usize, sample: F) -> Result<f32>
    where
        F: Fn(usize) -> (&'a DataBlock, Option<usize>),
    {
        if let Some(rate) = self.config.learning_rate {
            scae.set_learning_rate(rate);
        }
        let input = scae.input_shape();
        let mut loss = 0.;

        scae.start_training();
        for epoch in 0..self.config.epochs {
            let mut total = 0.;
            for _ in 0..self.config.samples_per_epoch {
                let (image, label) = sample(self.rng.gen_range(0, count));
                let (x, y) = self.origin(image, input);
                scae.set_input(x, y);
                let result = match label {
                    Some(label) => scae.train_labelled(image, label),
                    None => scae.train(image),
                };
                total += match result {
                    Ok(error) => error,
                    Err(e) => {
                        scae.stop_training();
                        return Err(e);
                    }
                };
            }
            loss = total / self.config.samples_per_epoch.max(1) as f32;
            self.logger.epoch_loss(epoch, loss);
            info!(epoch, loss, "pre-training epoch");
        }
        scae.stop_training();
        scae.training_done()?;
        Ok(loss)
    }
}

/// Supervised training of the top layers of a [Ffcnn] on labelled images.
#[derive(Debug)]
pub struct FineTuner {
    config: TrainingConfig,
    logger: Box<dyn Logger>,
    rng: SmallRng,
}

/// Target vector of `class`: 1 on its output, 0 everywhere else.
pub fn one_hot(class: usize, len: usize) -> Vec<f32> {
    assert!(class < len, "Class {} is out of the {} outputs", class, len);
    let mut expected = vec![0.; len];
    expected[class] = 1.;
    expected
}

impl FineTuner {
    pub fn new(config: TrainingConfig, logger: Box<dyn Logger>) -> Self {
        let rng = SmallRng::seed_from_u64(config.seed);
        Self { config, logger, rng }
    }

    /// Runs the configured epochs over shuffled samples, reading every image at its
    /// top left corner. Returns the loss of the last epoch.
    pub fn run(&mut self, ffcnn: &mut Ffcnn, samples: &[(DataBlock, usize)]) -> Result<f32> {
        check_images(samples.iter().map(|(image, _)| image), ffcnn.stack().input_shape())?;
        if let Some(rate) = self.config.learning_rate {
            ffcnn.set_learning_rate(rate);
        }
        let outputs = ffcnn.stack().output_shape().len();
        let per_epoch = self.config.samples_per_epoch.min(samples.len());
        let mut order: Vec<usize> = (0..samples.len()).collect();
        let mut loss = 0.;

        ffcnn.set_input(0, 0);
        ffcnn.start_training();
        for epoch in 0..self.config.epochs {
            order.shuffle(&mut self.rng);
            let mut total = 0.;
            for (batch, i) in order.iter().take(per_epoch).enumerate() {
                let (image, class) = &samples[*i];
                let result = ffcnn.train(image, &one_hot(*class, outputs), self.config.nb_layers);
                let error = match result {
                    Ok(error) => error,
                    Err(e) => {
                        ffcnn.stop_training();
                        return Err(e);
                    }
                };
                self.logger.batch_loss(epoch, batch as u32, error);
                total += error;
            }
            loss = total / per_epoch.max(1) as f32;
            self.logger.epoch_loss(epoch, loss);
            info!(epoch, loss, "fine-tuning epoch");
        }
        ffcnn.stop_training();
        Ok(loss)
    }

    /// Share of the samples whose class is the largest output.
    pub fn accuracy(ffcnn: &mut Ffcnn, samples: &[(DataBlock, usize)]) -> Result<f32> {
        if samples.is_empty() {
            return Err(Error::Empty("evaluation samples"));
        }
        ffcnn.set_input(0, 0);
        let mut correct = 0;
        for (image, class) in samples {
            ffcnn.compute(image)?;
            if ffcnn.output_class() == *class {
                correct += 1;
            }
        }
        Ok(correct as f32 / samples.len() as f32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{ClassifierConfig, UnitConfig},
        initializer::Xavier,
        layers::LayerKind,
        optimizer::OptimizerConfig,
        unit::{UnitBuilder, UnitKind},
    };

    fn stripes(vertical: bool) -> DataBlock {
        let shape = Shape::new(4, 4, 1);
        let mut block = DataBlock::with_shape(shape);
        for x in 0..4 {
            for y in 0..4 {
                let on = if vertical { x % 2 == 0 } else { y % 2 == 0 };
                block.set_value(0, x, y, if on { 0.8 } else { -0.8 });
            }
        }
        block
    }

    fn config(epochs: u32) -> TrainingConfig {
        TrainingConfig {
            epochs,
            samples_per_epoch: 50,
            learning_rate: Some(0.05),
            seed: 2,
            nb_layers: 1,
        }
    }

    #[test]
    fn pre_training_lowers_the_loss() {
        let unit = UnitConfig::new(UnitKind::Standard, 2, 2, 3)
            .build(1, 0, &mut Xavier::with_seed(8))
            .unwrap();
        let mut scae = Scae::new(unit, 1, 1).unwrap();
        let images = vec![stripes(true), stripes(false)];

        let first = Pretrainer::new(config(1), Box::new(MockLogger))
            .run(&mut scae, &images)
            .unwrap();
        let last = Pretrainer::new(config(30), Box::new(TracingLogger))
            .run(&mut scae, &images)
            .unwrap();
        assert!(last < first, "loss went from {} to {}", first, last);
    }

    #[test]
    fn pca_pre_training_ends_with_a_fit() {
        let unit = UnitBuilder::new(UnitKind::Pca, 2, 2, 1, 2)
            .build(&mut Xavier::new())
            .unwrap();
        let mut scae = Scae::new(unit, 1, 1).unwrap();
        let loss = Pretrainer::new(config(1), Box::new(MockLogger))
            .run(&mut scae, &[stripes(true), stripes(false)])
            .unwrap();
        assert_eq!(loss, 0.);
        scae.compute(&stripes(true)).unwrap();
    }

    #[test]
    fn images_smaller_than_the_input_are_rejected() {
        let unit = UnitBuilder::new(UnitKind::Standard, 3, 3, 1, 2)
            .build(&mut Xavier::new())
            .unwrap();
        let mut scae = Scae::new(unit, 1, 1).unwrap();
        let result = Pretrainer::new(config(1), Box::new(MockLogger)).run(&mut scae, &[DataBlock::new(2, 4, 1)]);
        assert!(matches!(result, Err(Error::Config(_))));
        let result = Pretrainer::new(config(1), Box::new(MockLogger)).run(&mut scae, &[]);
        assert!(matches!(result, Err(Error::Empty(_))));
    }

    #[test]
    fn fine_tuning_separates_two_classes() {
        let unit = UnitBuilder::new(UnitKind::Standard, 4, 4, 1, 4)
            .build(&mut Xavier::with_seed(6))
            .unwrap();
        let scae = Scae::new(unit, 1, 1).unwrap();
        let classifier = ClassifierConfig {
            neurons: 2,
            encoder: LayerKind::Sigmoid,
            decoder: LayerKind::Sigmoid,
            optimizer: OptimizerConfig::default(),
        };
        let mut ffcnn = Ffcnn::from_scae(&scae, &[classifier], &mut Xavier::with_seed(6)).unwrap();
        let samples = vec![(stripes(true), 0), (stripes(false), 1)];

        let mut tuner = FineTuner::new(
            TrainingConfig {
                learning_rate: Some(0.5),
                nb_layers: 2,
                ..config(300)
            },
            Box::new(MockLogger),
        );
        tuner.run(&mut ffcnn, &samples).unwrap();
        assert_eq!(FineTuner::accuracy(&mut ffcnn, &samples).unwrap(), 1.);
    }

    #[test]
    fn one_hot_marks_a_single_output() {
        assert_eq!(one_hot(2, 4), vec![0., 0., 1., 0.]);
    }
}
